//! Call-history replay.
//!
//! Reads an operation's recorded inputs and outputs back in call order and
//! renders them as a trace:
//!
//! ```text
//! Cache.store was called 3 times:
//! Cache.store(*('foo',)) -> 13bf32a9-a249-4664-95fc-b1062db2038f
//! Cache.store(*('bar',)) -> dcddd00c-4219-4dd7-8877-66afbe8e7df8
//! Cache.store(*(42,)) -> 5e752f2b-ecd8-4925-a3ce-e2efdee08d20
//! ```

use std::fmt;

use tally_core::{OperationName, TallyResult};
use tracing::warn;

use crate::kv::KeyValueStore;

/// Rendered in place of an output that was never recorded.
pub const MISSING_OUTPUT: &str = "<no output recorded>";

/// One replayed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub input: String,
    pub output: Option<String>,
}

/// The full recorded history of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    name: OperationName,
    calls: Vec<RecordedCall>,
}

impl ReplayReport {
    pub fn name(&self) -> &OperationName {
        &self.name
    }

    /// Number of recorded inputs.
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// Report lines, header first.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.calls.len() + 1);
        lines.push(format!(
            "{} was called {} times:",
            self.name,
            self.call_count()
        ));
        for call in &self.calls {
            lines.push(format!(
                "{}(*{}) -> {}",
                self.name,
                call.input,
                call.output.as_deref().unwrap_or(MISSING_OUTPUT)
            ));
        }
        lines
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Read the full history of `name` from `store`.
///
/// Every recorded input yields one call. An input without a matching output
/// is reported with `output: None`; outputs beyond the last input are
/// dropped.
pub async fn replay(store: &dyn KeyValueStore, name: &OperationName) -> TallyResult<ReplayReport> {
    let inputs = store.range(&name.inputs_key(), 0, -1).await?;
    let outputs = store.range(&name.outputs_key(), 0, -1).await?;

    if inputs.len() != outputs.len() {
        warn!(
            operation = %name,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Call history is misaligned"
        );
    }

    let mut outputs = outputs.into_iter();
    let calls = inputs
        .into_iter()
        .map(|input| RecordedCall {
            input: String::from_utf8_lossy(&input).into_owned(),
            output: outputs
                .next()
                .map(|output| String::from_utf8_lossy(&output).into_owned()),
        })
        .collect();

    Ok(ReplayReport {
        name: name.clone(),
        calls,
    })
}
