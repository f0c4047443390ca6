use std::{cell::RefCell, io::{BufRead, Write}, path::{Path, PathBuf}, rc::Rc};

use anyhow::bail;
use itertools::Itertools;
use serde::{de::{Visitor, Error}, Deserialize, Serialize};


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutput {
    Number(f64),
    Boolean(bool),
    Repr(String), // "?" means we don't care about the value
}

/// Expected outcome of one fixture line: a value, or the kind of the error.
#[derive(Debug, Clone)]
pub struct TestEvaluationResult(Result<TestOutput, String>);

impl From<TestEvaluationResult> for Result<TestOutput, String> {
    fn from(value: TestEvaluationResult) -> Self {
        value.0
    }
}

const ERROR_KINDS: [&str; 8] = [
    "SyntaxError",
    "UnboundIdentifier",
    "ArityMismatch",
    "MalformedSpecialForm",
    "DivisionByZero",
    "TypeMismatch",
    "NumericOverflow",
    "StackOverflow",
];

struct TestEvaluationResultVisitor {}

impl<'de> Deserialize<'de> for TestEvaluationResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de> {

        deserializer.deserialize_map(TestEvaluationResultVisitor {})
    }
}

impl<'de> Visitor<'de> for TestEvaluationResultVisitor {
    type Value = TestEvaluationResult;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "A structure containing the boolean key 'ok'. If it's okay, contains the key 'output', otherwise the key 'type'")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>, {

        if map.next_key::<String>()? != Some("ok".to_owned()) {
            return Err(A::Error::custom("First key should be 'ok'"))
        }

        let ok: bool = map.next_value()?;
        let second = map.next_key::<String>()?.ok_or(A::Error::custom("Must have two keys"))?;
        let result = if ok {
            if second != "output" {
                return Err(A::Error::custom("Second key of a passing entry should be 'output'"))
            }
            TestEvaluationResult(Ok(map.next_value()?))
        } else {
            if second != "type" {
                return Err(A::Error::custom("Second key of a failing entry should be 'type'"))
            }

            let kind: String = map.next_value()?;
            if !ERROR_KINDS.contains(&kind.as_str()) {
                return Err(A::Error::custom(format!("Unrecognized error kind: {}", kind)))
            }
            TestEvaluationResult(Err(kind))
        };

        if map.next_key::<String>()?.is_some() {
            return Err(A::Error::custom("Only two keys should be present"));
        }

        Ok(result)
    }
}

/// Output sink the tests can read back after handing a clone to a context.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn load_input_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<String>> {
    let source = std::fs::read(path)?;
    Ok(source.lines().collect::<Result<Vec<String>, _>>()?)
}

fn load_output_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<TestEvaluationResult>> {
    let source = std::fs::read(path)?;
    let result: Vec<TestEvaluationResult> = serde_json::from_slice(&source)?;
    Ok(result)
}

const TESTCASES: usize = 9;

pub fn load_test_pair(testcase: usize) -> anyhow::Result<Vec<(String, TestEvaluationResult)>> {
    if !(1..=TESTCASES).contains(&testcase) { bail!("Testcase out of bounds"); }

    let base_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let input = load_input_file(base_path.join("test_inputs").join(format!("{}.scm", testcase)))?;
    let output = load_output_file(base_path.join("test_outputs").join(format!("{}.json", testcase)))?;

    if input.len() != output.len() { bail!("Input and output of testcase {} does not match", testcase); }
    Ok(input.into_iter().zip(output).collect_vec())
}

pub fn all_testcases() -> impl Iterator<Item = usize> {
    1..=TESTCASES
}
