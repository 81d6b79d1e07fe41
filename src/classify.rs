/// Failure classification for the stable log line.
///
/// Two signatures are recognized:
/// - a fixed fatal marker substring anywhere in the line
/// - a failed-job counter field (marker followed by an integer >= 1)
use regex::Regex;

/// What the stable line encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Line contains the fatal marker.
    Fatal,
    /// Line carries a non-zero failed-job count.
    FailedUnits(u64),
    /// Neither signature present.
    Healthy,
}

/// Classifies lines against the configured markers.
///
/// The count pattern is compiled once at startup from the escaped marker, so
/// markers containing regex metacharacters (quotes, braces) match literally.
pub struct Classifier {
    fatal_marker: String,
    count_pattern: Regex,
}

impl Classifier {
    pub fn new(fatal_marker: &str, failure_count_marker: &str) -> Result<Self, regex::Error> {
        let count_pattern = Regex::new(&format!(
            r"{}\s*(\d+)",
            regex::escape(failure_count_marker)
        ))?;
        Ok(Self {
            fatal_marker: fatal_marker.to_string(),
            count_pattern,
        })
    }

    /// Classify a line. The fatal marker wins over the counter; a count of
    /// exactly zero and malformed counter text both classify as healthy.
    pub fn classify(&self, line: &str) -> Classification {
        if line.contains(&self.fatal_marker) {
            return Classification::Fatal;
        }

        if let Some(caps) = self.count_pattern.captures(line) {
            if let Ok(count) = caps[1].parse::<u64>() {
                if count >= 1 {
                    return Classification::FailedUnits(count);
                }
            }
        }

        Classification::Healthy
    }
}
