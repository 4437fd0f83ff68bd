use std::str::FromStr;

/// `1/true/yes/on` and `0/false/no/off`, any case; anything else is `None`.
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn env_bool(key: &str) -> Option<bool> {
    env_parse::<String>(key).and_then(|raw| parse_bool_flag(&raw))
}

/// Read and parse an environment variable; unset or unparsable reads as `None`.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_bool_flag_recognizes_common_values() {
        assert_eq!(parse_bool_flag("true"), Some(true));
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
        assert_eq!(parse_bool_flag(""), None);
    }

    #[test]
    #[serial]
    fn env_helpers_read_env() {
        std::env::set_var("BB_TEST_BOOL", "on");
        assert_eq!(env_bool("BB_TEST_BOOL"), Some(true));
        std::env::set_var("BB_TEST_BOOL", "No");
        assert_eq!(env_bool("BB_TEST_BOOL"), Some(false));
        std::env::remove_var("BB_TEST_BOOL");
        assert_eq!(env_bool("BB_TEST_BOOL"), None);

        std::env::set_var("BB_TEST_NUM", " 250 ");
        assert_eq!(env_parse::<u64>("BB_TEST_NUM"), Some(250));
        std::env::set_var("BB_TEST_NUM", "lots");
        assert_eq!(env_parse::<u64>("BB_TEST_NUM"), None);
        std::env::remove_var("BB_TEST_NUM");
    }
}
