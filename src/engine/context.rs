// Context shared by every state of one execution tree

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::action::ActionBus;
use crate::engine::report::{Report, ReportEntry, ReportLevel, ReportSink};
use crate::engine::settings::{ParameterType, ParameterValue};
use crate::engine::types::NestedName;

/// Time source used for report timestamps and waiting.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// One-shot configuration lookup used by states at construct time.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ParameterSource: Send + Sync {
    fn get_param(&self, path: &str) -> Option<ParameterValue>;
}

/// Parameter source backed by a fixed table.
#[derive(Debug, Default, Clone)]
pub struct MapParameterSource {
    values: BTreeMap<String, ParameterValue>,
}

impl MapParameterSource {
    pub fn new(values: BTreeMap<String, ParameterValue>) -> Self {
        Self { values }
    }

    pub fn with(mut self, path: impl Into<String>, value: ParameterValue) -> Self {
        self.values.insert(path.into(), value);
        self
    }
}

impl ParameterSource for MapParameterSource {
    fn get_param(&self, path: &str) -> Option<ParameterValue> {
        self.values.get(path).cloned()
    }
}

/// Reads `path` into `out`. Leaves `out` untouched and returns false when the
/// parameter is absent or has another type.
pub fn get_param<T: ParameterType>(source: &dyn ParameterSource, path: &str, out: &mut T) -> bool {
    match source.get_param(path) {
        Some(value) => match T::from_value(&value) {
            Some(parsed) => {
                *out = parsed;
                true
            }
            None => {
                debug!(path = %path, expected = T::TAG, "Parameter has unexpected type, keeping default");
                false
            }
        },
        None => {
            debug!(path = %path, "Parameter not found, keeping default");
            false
        }
    }
}

/// Runtime dependencies injected into every state of a tree.
pub struct Context {
    clock: Arc<dyn Clock>,
    report: Arc<dyn ReportSink>,
    parameters: Arc<dyn ParameterSource>,
    actions: Arc<ActionBus>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn report_sink(&self) -> &dyn ReportSink {
        self.report.as_ref()
    }

    pub fn parameters(&self) -> &dyn ParameterSource {
        self.parameters.as_ref()
    }

    pub fn actions(&self) -> &Arc<ActionBus> {
        &self.actions
    }

    /// Entry stamped with the context's clock, for callers that attach a value.
    pub fn create_entry(
        &self,
        state: &NestedName,
        level: ReportLevel,
        message: impl Into<String>,
    ) -> ReportEntry {
        ReportEntry::new(self.clock.now(), state.to_string(), level, message)
    }

    pub fn add_entry(&self, entry: ReportEntry) {
        self.report.add_entry(entry);
    }

    pub fn add_simple_entry(&self, state: &NestedName, level: ReportLevel, message: impl Into<String>) {
        let entry = self.create_entry(state, level, message);
        self.add_entry(entry);
    }
}

/// Builder replacing individual context dependencies.
#[derive(Default)]
pub struct ContextBuilder {
    clock: Option<Arc<dyn Clock>>,
    report: Option<Arc<dyn ReportSink>>,
    parameters: Option<Arc<dyn ParameterSource>>,
    actions: Option<Arc<ActionBus>>,
}

impl ContextBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn report_sink(mut self, report: Arc<dyn ReportSink>) -> Self {
        self.report = Some(report);
        self
    }

    pub fn parameters(mut self, parameters: Arc<dyn ParameterSource>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn actions(mut self, actions: Arc<ActionBus>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn build(self) -> Context {
        Context {
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            report: self.report.unwrap_or_else(|| Arc::new(Report::new())),
            parameters: self
                .parameters
                .unwrap_or_else(|| Arc::new(MapParameterSource::default())),
            actions: self.actions.unwrap_or_else(|| Arc::new(ActionBus::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::report::MockReportSink;
    use crate::engine::types::StateName;

    #[test]
    fn test_get_param_keeps_default_when_missing_or_mistyped() {
        let source = MapParameterSource::default()
            .with("/example/action", ParameterValue::String("/custom".to_string()))
            .with("/example/order", ParameterValue::Int(4));

        let mut action = "/fibonacci".to_string();
        assert!(get_param(&source, "/example/action", &mut action));
        assert_eq!(action, "/custom");

        let mut missing = "/fibonacci".to_string();
        assert!(!get_param(&source, "/example/missing", &mut missing));
        assert_eq!(missing, "/fibonacci");

        let mut mistyped = "/fibonacci".to_string();
        assert!(!get_param(&source, "/example/order", &mut mistyped));
        assert_eq!(mistyped, "/fibonacci");
    }

    #[test]
    fn test_simple_entry_goes_to_injected_sink() {
        let mut sink = MockReportSink::new();
        sink.expect_add_entry()
            .withf(|entry| entry.state == "Root/Leaf" && entry.level == ReportLevel::Warn)
            .times(1)
            .return_const(());

        let context = Context::builder().report_sink(Arc::new(sink)).build();
        let name = NestedName::root(StateName::new("Root")).child(&StateName::new("Leaf"));
        context.add_simple_entry(&name, ReportLevel::Warn, "careful");
    }

    #[test]
    fn test_get_param_queries_injected_source() {
        let mut source = MockParameterSource::new();
        source
            .expect_get_param()
            .withf(|path| path == "/example/order")
            .times(1)
            .returning(|_| Some(ParameterValue::Int(9)));

        let mut order = 0_i32;
        assert!(get_param(&source, "/example/order", &mut order));
        assert_eq!(order, 9);
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn sleep(&self, _duration: Duration) {}
    }

    #[test]
    fn test_entries_are_stamped_by_injected_clock() {
        let instant = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let context = Context::builder().clock(Arc::new(FixedClock(instant))).build();
        let entry = context.create_entry(&NestedName::root(StateName::new("Root")), ReportLevel::Info, "done");

        assert_eq!(entry.timestamp, instant);
        assert_eq!(entry.state, "Root");
    }
}
