use crate::{BibfedError, ErrorCode, ErrorContext};

impl From<reqwest::Error> for BibfedError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());

        if let Some(status) = err.status() {
            return BibfedError::new(
                ErrorCode::UnexpectedStatus,
                format!("unexpected http status code: {}", status.as_u16()),
            )
            .with_context(ErrorContext::Transport {
                endpoint,
                status: Some(status.as_u16()),
            });
        }

        if err.is_decode() {
            return BibfedError::new(
                ErrorCode::MalformedResponse,
                format!("failed to decode response body: {}", err),
            );
        }

        BibfedError::new(ErrorCode::ConnectionFailed, format!("request failed: {}", err))
            .with_context(ErrorContext::Transport {
                endpoint,
                status: None,
            })
    }
}

impl From<serde_json::Error> for BibfedError {
    fn from(err: serde_json::Error) -> Self {
        BibfedError::new(
            ErrorCode::MalformedResponse,
            format!("invalid JSON payload: {}", err),
        )
    }
}

impl From<quick_xml::Error> for BibfedError {
    fn from(err: quick_xml::Error) -> Self {
        BibfedError::new(
            ErrorCode::MalformedResponse,
            format!("invalid XML payload: {}", err),
        )
    }
}

impl From<url::ParseError> for BibfedError {
    fn from(err: url::ParseError) -> Self {
        BibfedError::new(ErrorCode::InvalidEndpoint, format!("invalid URL: {}", err))
    }
}

/// Find the closest allowed name for a rejected field, for "did you mean"
/// hints on compilation errors.
pub fn closest_match(target: &str, options: &[String]) -> Option<String> {
    let mut best_match: Option<&str> = None;
    let mut min_distance = usize::MAX;

    for option in options {
        let distance = levenshtein(target, option);
        if distance < min_distance && distance <= 3 {
            min_distance = distance;
            best_match = Some(option.as_str());
        }
    }

    best_match.map(|s| s.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let len_a = a.len();
    let len_b = b.len();
    let mut dp = vec![vec![0; len_b + 1]; len_a + 1];

    for (i, row) in dp.iter_mut().enumerate().take(len_a + 1) {
        row[0] = i;
    }
    for (j, val) in dp[0].iter_mut().enumerate().take(len_b + 1) {
        *val = j;
    }

    for i in 1..=len_a {
        for j in 1..=len_b {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = std::cmp::min(
                std::cmp::min(dp[i - 1][j] + 1, dp[i][j - 1] + 1),
                dp[i - 1][j - 1] + cost,
            );
        }
    }

    dp[len_a][len_b]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("title", "titel"), 2);
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_closest_match() {
        let options = vec![
            "title".to_string(),
            "creator".to_string(),
            "publisher".to_string(),
        ];

        assert_eq!(closest_match("title", &options), Some("title".to_string()));
        assert_eq!(closest_match("titel", &options), Some("title".to_string()));
        assert_eq!(closest_match("creater", &options), Some("creator".to_string()));

        // No match (distance > 3)
        assert_eq!(closest_match("completely_different", &options), None);
    }

    #[test]
    fn test_json_error_mapping() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: BibfedError = json_err.into();
        assert_eq!(err.code, ErrorCode::MalformedResponse);
        assert!(err.message.contains("invalid JSON payload"));
    }

    #[test]
    fn test_url_error_mapping() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: BibfedError = url_err.into();
        assert_eq!(err.code, ErrorCode::InvalidEndpoint);
    }
}
