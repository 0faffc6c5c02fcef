use std::fmt;

/// Delete predicate in the InfluxDB v2 delete syntax:
/// `_measurement="cpu" AND run_id="..."`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletePredicate {
    measurement: Option<String>,
    tags: Vec<(String, String)>,
    raw: Option<String>,
}

impl DeletePredicate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = Some(measurement.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Appends a user supplied expression verbatim.
    #[must_use]
    pub fn raw(mut self, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        if !expression.trim().is_empty() {
            self.raw = Some(expression.trim().to_string());
        }
        self
    }

    /// True when the predicate matches every point.
    pub fn is_empty(&self) -> bool {
        self.measurement.is_none() && self.tags.is_empty() && self.raw.is_none()
    }

    /// Parses a rendered predicate back into `key="value"` pairs. Only the
    /// `AND`-joined equality subset produced by this type is understood.
    #[must_use]
    pub fn parse_equalities(predicate: &str) -> Option<Vec<(String, String)>> {
        if predicate.trim().is_empty() {
            return Some(Vec::new());
        }
        predicate
            .split(" AND ")
            .map(|clause| {
                let (key, value) = clause.trim().split_once('=')?;
                let key = key.trim();
                if key.is_empty()
                    || !key
                        .chars()
                        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                {
                    return None;
                }
                let value = value.trim().strip_prefix('"')?.strip_suffix('"')?;
                Some((key.to_string(), value.replace("\\\"", "\"")))
            })
            .collect()
    }
}

impl fmt::Display for DeletePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();
        if let Some(measurement) = &self.measurement {
            clauses.push(format!("_measurement=\"{}\"", quote(measurement)));
        }
        for (key, value) in &self.tags {
            clauses.push(format!("{key}=\"{}\"", quote(value)));
        }
        if let Some(raw) = &self.raw {
            clauses.push(raw.clone());
        }
        f.write_str(&clauses.join(" AND "))
    }
}

fn quote(value: &str) -> String {
    value.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_scoped_predicate() {
        let predicate = DeletePredicate::new()
            .measurement("cpu")
            .tag("run_id", "1234");
        assert_eq!(predicate.to_string(), "_measurement=\"cpu\" AND run_id=\"1234\"");
        assert_eq!(
            DeletePredicate::parse_equalities(&predicate.to_string()).unwrap(),
            vec![
                ("_measurement".to_string(), "cpu".to_string()),
                ("run_id".to_string(), "1234".to_string())
            ]
        );
    }

    #[test]
    fn empty_predicate_matches_everything() {
        let predicate = DeletePredicate::new().raw("   ");
        assert!(predicate.is_empty());
        assert_eq!(predicate.to_string(), "");
        assert_eq!(DeletePredicate::parse_equalities("").unwrap(), vec![]);
    }

    #[test]
    fn raw_expression_is_appended() {
        let predicate = DeletePredicate::new()
            .measurement("cpu")
            .raw("host=\"a\"");
        assert_eq!(predicate.to_string(), "_measurement=\"cpu\" AND host=\"a\"");
        assert!(DeletePredicate::parse_equalities("host != \"a\"").is_none());
    }
}
