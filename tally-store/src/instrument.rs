//! Call instrumentation.
//!
//! [`Instrumented`] wraps an operation passed in as a closure. Each call
//! bumps a counter named after the operation and records the rendered
//! arguments and result in two lists, `<name>:inputs` and `<name>:outputs`.
//! The wrapped operation's result or error is handed back untouched.
//!
//! The counter is bumped before the operation runs. The input and output
//! are written together with [`KeyValueStore::append_pair`] once the
//! operation finishes, so under concurrent callers the Nth input is always
//! the Nth output's call.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tally_core::{CallArgs, FailurePolicy, OperationName, TallyResult};
use tracing::{debug, debug_span, warn, Instrument};

use crate::kv::KeyValueStore;

/// Prefix of the output recorded for a failed call under
/// [`FailurePolicy::RecordMarker`].
pub const ERROR_MARKER_PREFIX: &str = "!error: ";

/// Counting and history-recording wrapper for one named operation.
#[derive(Clone)]
pub struct Instrumented {
    store: Arc<dyn KeyValueStore>,
    name: OperationName,
    count: bool,
    history: bool,
    failure_policy: FailurePolicy,
}

impl Instrumented {
    /// Wrap calls to `name`, counting them and recording history.
    pub fn new(store: Arc<dyn KeyValueStore>, name: impl Into<OperationName>) -> Self {
        Self {
            store,
            name: name.into(),
            count: true,
            history: true,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Enable or disable the call counter.
    pub fn count_calls(mut self, enabled: bool) -> Self {
        self.count = enabled;
        self
    }

    /// Enable or disable input/output history.
    pub fn record_history(mut self, enabled: bool) -> Self {
        self.history = enabled;
        self
    }

    /// Choose what gets recorded when the operation fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn name(&self) -> &OperationName {
        &self.name
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Invoke `op`, recording the call under this wrapper's name.
    ///
    /// Errors from `op` are returned as-is, even if recording them fails.
    /// On success a failure to record is returned instead of the result,
    /// since the caller must be able to rely on the history being written.
    pub async fn call<T, F, Fut>(&self, args: CallArgs, op: F) -> TallyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TallyResult<T>>,
        T: Display,
    {
        let span = debug_span!("instrumented_call", operation = %self.name);
        async move {
            if self.count {
                let calls = self.store.increment(&self.name.counter_key()).await?;
                debug!(calls, "Counted call");
            }

            let outcome = op().await;

            if !self.history {
                return outcome;
            }

            let input = args.to_string();
            match outcome {
                Ok(value) => {
                    self.record(&input, &value.to_string()).await?;
                    Ok(value)
                }
                Err(err) => {
                    if self.failure_policy == FailurePolicy::RecordMarker {
                        let marker = format!("{}{}", ERROR_MARKER_PREFIX, err);
                        if let Err(record_err) = self.record(&input, &marker).await {
                            warn!(error = %record_err, "Failed to record failed call");
                        }
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn record(&self, input: &str, output: &str) -> TallyResult<()> {
        self.store
            .append_pair(
                &self.name.inputs_key(),
                input.as_bytes(),
                &self.name.outputs_key(),
                output.as_bytes(),
            )
            .await
    }
}

impl std::fmt::Debug for Instrumented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumented")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("history", &self.history)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::replay::replay;
    use proptest::prelude::*;
    use tally_test_utils::generators::{arb_operation_name, arb_stored_value};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Histories are keyed by operation name, whatever the name is.
        #[test]
        fn prop_history_follows_operation_name(
            name in arb_operation_name(),
            values in proptest::collection::vec(arb_stored_value(), 0..8),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let store = Arc::new(MemoryStore::new());
            let calls = Instrumented::new(store.clone(), name.clone());
            let report = rt.block_on(async {
                for value in &values {
                    calls
                        .call(CallArgs::single(value), || async { Ok(value.kind()) })
                        .await
                        .unwrap();
                }
                replay(store.as_ref(), &name).await.unwrap()
            });

            prop_assert_eq!(report.name(), &name);
            prop_assert_eq!(report.call_count(), values.len());
            for (call, value) in report.calls().iter().zip(&values) {
                prop_assert_eq!(&call.input, &CallArgs::single(value).to_string());
                prop_assert_eq!(call.output.as_deref(), Some(value.kind()));
            }
        }
    }
}
