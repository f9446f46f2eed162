use std::str::FromStr;

use regex::Regex;
use tokio::time::Duration;

/// Parses a duration string in the format "250ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = match s.strip_suffix("ms") {
        Some(value) => (value, "ms"),
        None => {
            let split = s
                .char_indices()
                .last()
                .map(|(i, _)| i)
                .unwrap_or_default();
            (&s[..split], &s[split..])
        }
    };

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Duration too large: '{}'", s))
    };

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "d" => seconds(24 * 60 * 60),
        _ => Err(format!(
            "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
            unit
        )),
    }
}

/// Parses a request timeout: a duration string, or a bare integer number
/// of seconds. Zero means no timeout.
pub fn parse_timeout(s: &str) -> Result<Duration, String> {
    match u64::from_str(s.trim()) {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => parse_duration_string(s),
    }
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.peek() == Some(&',') {
                    current_header.push(',');
                    chars.next();
                } else {
                    current_header.push('\\');
                }
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.clone());
                }
                current_header.clear();
            }
            _ => {
                current_header.push(ch);
            }
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

lazy_static::lazy_static! {
    static ref HEADER_LINE: Regex = Regex::new(r"^([\w-]+):\s*(.+)").unwrap();
    static ref BASIC_AUTH: Regex = Regex::new(r"^(.+):([^\s].+)").unwrap();
}

/// Splits a `Name: value` header line. Returns `None` when the line does
/// not look like a header.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let captures = HEADER_LINE.captures(line.trim())?;
    Some((
        captures[1].to_string(),
        captures[2].trim_end().to_string(),
    ))
}

/// Splits `user:password` basic auth credentials.
///
/// The split happens at the last colon that leaves a password of at least
/// two characters not starting with whitespace.
pub fn parse_basic_auth(credentials: &str) -> Option<(String, String)> {
    let captures = BASIC_AUTH.captures(credentials)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- parse_duration_string tests ---

    mod duration {
        use super::*;

        #[test]
        fn parse_minutes() {
            assert_eq!(
                parse_duration_string("10m").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn parse_hours() {
            assert_eq!(
                parse_duration_string("5h").unwrap(),
                Duration::from_secs(18000)
            );
        }

        #[test]
        fn parse_days() {
            assert_eq!(
                parse_duration_string("3d").unwrap(),
                Duration::from_secs(259200)
            );
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10m  ").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("30s").unwrap(),
                Duration::from_secs(30)
            );
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn fractional_number_errors() {
            let err = parse_duration_string("5.5h").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn negative_number_errors() {
            let err = parse_duration_string("-5m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }
    }

    // --- parse_headers_with_escapes tests ---

    #[test]
    fn test_parse_headers_simple() {
        let headers_str = "Content-Type:application/json,Authorization:Bearer token";
        let result = parse_headers_with_escapes(headers_str);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "Content-Type:application/json");
        assert_eq!(result[1], "Authorization:Bearer token");
    }

    #[test]
    fn test_parse_headers_with_escaped_comma() {
        let headers_str = "Connection:keep-alive,Keep-Alive:timeout=5\\,max=200";
        let result = parse_headers_with_escapes(headers_str);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "Connection:keep-alive");
        assert_eq!(result[1], "Keep-Alive:timeout=5,max=200");
    }

    #[test]
    fn test_parse_headers_backslash_not_before_comma() {
        let headers_str = "Path:C:\\Users\\test,Host:example.com";
        let result = parse_headers_with_escapes(headers_str);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "Path:C:\\Users\\test");
        assert_eq!(result[1], "Host:example.com");
    }

    #[test]
    fn test_parse_headers_empty_and_whitespace() {
        let headers_str = "  Header1:value1  ,  ,  Header2:value2  ";
        let result = parse_headers_with_escapes(headers_str);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "  Header1:value1  ");
        assert_eq!(result[1], "  Header2:value2  ");
    }

    #[test]
    fn test_parse_headers_trailing_comma() {
        let headers_str = "Header1:value1,Header2:value2,";
        let result = parse_headers_with_escapes(headers_str);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "Header1:value1");
        assert_eq!(result[1], "Header2:value2");
    }

    // --- timeouts, header lines and credentials ---

    #[test]
    fn test_parse_milliseconds() {
        assert_eq!(
            parse_duration_string("250ms").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_parse_duration_overflow_errors() {
        let err = parse_duration_string("18446744073709551615d").unwrap_err();
        assert!(err.contains("too large"), "error was: {}", err);
    }

    #[test]
    fn test_parse_timeout_bare_seconds() {
        assert_eq!(parse_timeout("20").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_timeout("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_timeout("1500ms").unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_parse_header_line() {
        assert_eq!(
            parse_header_line("X-Request-Id: abc 123"),
            Some(("X-Request-Id".to_string(), "abc 123".to_string()))
        );
        assert_eq!(
            parse_header_line("Accept:application/json"),
            Some(("Accept".to_string(), "application/json".to_string()))
        );
        assert_eq!(parse_header_line("not a header"), None);
        assert_eq!(parse_header_line("Empty:"), None);
    }

    #[test]
    fn test_parse_basic_auth() {
        assert_eq!(
            parse_basic_auth("alice:secret"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        // Greedy user part: the last usable colon splits.
        assert_eq!(
            parse_basic_auth("svc:team:pw"),
            Some(("svc:team".to_string(), "pw".to_string()))
        );
        assert_eq!(parse_basic_auth("alice"), None);
        assert_eq!(parse_basic_auth("alice: secret"), None);
    }
}
