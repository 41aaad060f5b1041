//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Shoal Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[client]
# id = ""                        # client user id (User-Id header)

[registry]
# resume_key = "my-resume-key"   # enables session resuming when set
# resume_timeout_secs = 30       # 1-3600
# reconnect_tries = 2
# reconnect_interval_ms = 5000   # 100-600000
# move_on_disconnect = false
# rest_timeout_ms = 15000
# voice_connection_timeout_ms = 15000

# [[nodes]]
# name = "main"
# host = "localhost"
# port = 2333
# auth = "youshallnotpass"
# secure = false
# group = "eu"

[logging]
# level = "INFO"                 # TRACE, DEBUG, INFO, WARNING, ERROR
# json = false
"##
    .to_string()
}
