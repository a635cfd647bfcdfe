//! Benchmark case definitions
//!
//! Cases come from a TOML file with one `[[cases]]` table per case, or from
//! the built-in set when no file is configured.
//!
//! ```toml
//! [[cases]]
//! id = "box"
//! name = "Simple box"
//! prompt = "Create a box 20 by 10 by 5"
//! reference_procedure = "result = cq.Workplane('XY').box(20, 10, 5)"
//! timeout_ms = 45000
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use cm_core::TestCase;

use super::BenchError;

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    cases: Vec<RawCase>,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    id: String,
    name: Option<String>,
    prompt: String,
    reference_procedure: String,
    timeout_ms: Option<u64>,
}

/// Ordered, id-unique list of test cases
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    cases: Vec<TestCase>,
}

impl TestSuite {
    /// Build a suite, rejecting empty or duplicate ids
    pub fn new(cases: Vec<TestCase>) -> Result<Self, BenchError> {
        let mut seen = HashSet::new();
        for case in &cases {
            if case.id.trim().is_empty() {
                return Err(BenchError::Invalid("case id must not be empty".to_string()));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(BenchError::Invalid(format!("duplicate case id '{}'", case.id)));
            }
            if case.timeout.is_zero() {
                return Err(BenchError::Invalid(format!(
                    "case '{}' has a zero timeout",
                    case.id
                )));
            }
        }
        Ok(Self { cases })
    }

    /// Parse `[[cases]]` tables; cases without `timeout_ms` get `default_timeout`
    pub fn from_toml(text: &str, default_timeout: Duration) -> Result<Self, BenchError> {
        let file: SuiteFile = toml::from_str(text)?;
        let cases = file
            .cases
            .into_iter()
            .map(|raw| TestCase {
                name: raw.name.unwrap_or_else(|| raw.id.clone()),
                id: raw.id,
                prompt: raw.prompt,
                reference_procedure: raw.reference_procedure,
                timeout: raw
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timeout),
            })
            .collect();
        Self::new(cases)
    }

    pub fn load(path: &Path, default_timeout: Duration) -> Result<Self, BenchError> {
        let text = std::fs::read_to_string(path)?;
        let suite = Self::from_toml(&text, default_timeout)?;
        tracing::debug!(path = %path.display(), cases = suite.len(), "Loaded benchmark cases");
        Ok(suite)
    }

    /// Built-in cases covering a primitive, a boolean cut and a union
    pub fn builtin(default_timeout: Duration) -> Self {
        let case = |id: &str, name: &str, prompt: &str, procedure: &str| TestCase {
            id: id.to_string(),
            name: name.to_string(),
            prompt: prompt.to_string(),
            reference_procedure: procedure.to_string(),
            timeout: default_timeout,
        };

        Self {
            cases: vec![
                case(
                    "box",
                    "Simple box",
                    "Create a box 20mm wide, 10mm deep and 5mm tall",
                    "import cadquery as cq\nresult = cq.Workplane('XY').box(20, 10, 5)",
                ),
                case(
                    "cylinder_hole",
                    "Cylinder with hole",
                    "Create a cylinder of radius 10mm and height 20mm with a 4mm radius hole through its axis",
                    "import cadquery as cq\nresult = cq.Workplane('XY').cylinder(20, 10).faces('>Z').workplane().hole(8)",
                ),
                case(
                    "l_bracket",
                    "L bracket",
                    "Create an L-shaped bracket from two 40x20x5mm plates joined at a right angle",
                    "import cadquery as cq\nbase = cq.Workplane('XY').box(40, 20, 5)\nwall = cq.Workplane('XY').box(5, 20, 40).translate((17.5, 0, 22.5))\nresult = base.union(wall)",
                ),
            ],
        }
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(30);

    #[test]
    fn test_parse_with_default_timeout() {
        let suite = TestSuite::from_toml(
            r#"
[[cases]]
id = "a"
prompt = "make a box"
reference_procedure = "result = cq.Workplane('XY').box(1, 1, 1)"

[[cases]]
id = "b"
name = "Sphere"
prompt = "make a sphere"
reference_procedure = "result = cq.Workplane('XY').sphere(5)"
timeout_ms = 500
"#,
            DEFAULT,
        )
        .unwrap();

        assert_eq!(suite.len(), 2);
        let a = suite.get("a").unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.timeout, DEFAULT);
        assert_eq!(suite.get("b").unwrap().timeout, Duration::from_millis(500));
        assert_eq!(suite.cases()[1].name, "Sphere");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = TestSuite::from_toml(
            r#"
[[cases]]
id = "a"
prompt = "x"
reference_procedure = "y"

[[cases]]
id = "a"
prompt = "x"
reference_procedure = "y"
"#,
            DEFAULT,
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::Invalid(_)));
    }

    #[test]
    fn test_missing_prompt_is_parse_error() {
        let err = TestSuite::from_toml("[[cases]]\nid = \"a\"\n", DEFAULT).unwrap_err();
        assert!(matches!(err, BenchError::Parse(_)));
    }

    #[test]
    fn test_builtin_cases_unique() {
        let suite = TestSuite::builtin(DEFAULT);
        assert_eq!(suite.len(), 3);
        assert!(TestSuite::new(suite.cases().to_vec()).is_ok());
        assert!(suite
            .cases()
            .iter()
            .all(|c| c.reference_procedure.contains("cq.Workplane")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.toml");
        std::fs::write(
            &path,
            "[[cases]]\nid = \"a\"\nprompt = \"p\"\nreference_procedure = \"r\"\n",
        )
        .unwrap();

        let suite = TestSuite::load(&path, DEFAULT).unwrap();
        assert_eq!(suite.cases()[0].id, "a");
        assert!(matches!(
            TestSuite::load(&dir.path().join("missing.toml"), DEFAULT),
            Err(BenchError::Io(_))
        ));
    }
}
