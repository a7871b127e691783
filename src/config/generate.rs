pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# TAILSHIP CONFIGURATION
# =============================================================================
# Tails hour-rotated access logs and ships them to a collector in batches.
#
# For every name in `files`, the file followed is:
#   <path>/<name>/access-<YYYYMMDDHH>.log   (local time)
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ./config.yml or ./config.json
#   3. ~/.config/tailship/config.yml
#   4. /etc/tailship/config.yml

# Collector endpoint. Batches are POSTed as multipart/form-data with a `log`
# file part and an `app` field. The collector must answer {"code":"0000"}.
url: http://127.0.0.1:8080/upload

# Per-request timeout in seconds. A slow collector throttles only the source
# whose batch is being sent.
timeout: 10

# Send a batch as soon as this many lines are buffered. Smaller batches are
# sent on the flush interval (once per minute by default).
line_num: 500

# Base directory and the source directories below it.
path: /var/log/nginx
files:
  - site_a
  - site_b

# Application tag sent with every batch.
app: my-app

# Read offset for files opened at startup: 0 = file start, 2 = file end.
first_whence: 2
# Read offset for files opened after the first hourly rotation.
follow_whence: 0

# Wait until this wall-clock second before starting (0-59). Keeps startup away
# from the hour boundary. Remove to start immediately.
start_second: 30

# tuning:
#   flush_interval: 1m
#   report_interval: 15m
#   shutdown_grace: 5s
#   poll_interval: 250ms
#   line_buffer: 1024
"#
    .to_string()
}
