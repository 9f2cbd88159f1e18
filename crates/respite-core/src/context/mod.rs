//! Smart delay: may a break interrupt the user right now?
//!
//! A [`ContextEvaluator`] asks a list of [`ContextSignal`]s, highest priority
//! first, and stops at the first one that requests a delay. A signal whose
//! source is unauthorized or unavailable abstains instead of blocking the
//! evaluation.
//!
//! ## Priority order
//!
//! | Priority | Signal              | Suggested delay                |
//! |----------|---------------------|--------------------------------|
//! | 100      | calendar conflict   | until the meeting ends (bounded) |
//! | 80       | excluded app        | short re-check                 |
//! | 60       | fullscreen app      | short re-check                 |
//! | 40       | presentation app    | medium re-check                |
//! | 20       | do-not-disturb      | medium re-check                |

mod signals;

pub use signals::{
    AppInfo, CalendarEvent, CalendarSignal, CalendarSource, DoNotDisturbSignal, ExcludedAppSignal,
    FocusModeSource, ForegroundAppSource, FullscreenSignal, PresentationSignal,
};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::breaks::bounded_secs;
use crate::error::SignalError;
use crate::storage::SmartDelayConfig;

/// Closed set of reasons a break may be delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayReason {
    CalendarEvent,
    ExcludedApplication,
    FullscreenApplication,
    PresentationMode,
    DoNotDisturb,
    Other,
}

/// A signal's request to hold off the break.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayRequest {
    pub reason: DelayReason,
    /// When to evaluate again. Not a promise that the break fires then.
    pub suggested_delay: Duration,
    /// 0.0 ..= 1.0
    pub confidence: f32,
    /// Human-readable detail, e.g. the meeting title or app name.
    pub detail: String,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum DelayVerdict {
    Allow,
    Delay(DelayRequest),
}

impl DelayVerdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, DelayVerdict::Allow)
    }

    pub fn reason(&self) -> Option<DelayReason> {
        match self {
            DelayVerdict::Allow => None,
            DelayVerdict::Delay(req) => Some(req.reason),
        }
    }
}

/// One independent source of "not now".
pub trait ContextSignal: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> u8;

    /// `Ok(None)` means no objection; `Err` means the signal abstains.
    fn check(&self, now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError>;
}

/// What the engine consults before starting a scheduled break.
pub trait DelayAdvisor: Send + Sync {
    fn evaluate(&self, now: DateTime<Utc>) -> DelayVerdict;
}

/// Advisor that never delays.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAllow;

impl DelayAdvisor for AlwaysAllow {
    fn evaluate(&self, _now: DateTime<Utc>) -> DelayVerdict {
        DelayVerdict::Allow
    }
}

/// Priority-ordered, short-circuiting evaluator.
#[derive(Default)]
pub struct ContextEvaluator {
    signals: Vec<Box<dyn ContextSignal>>,
    disabled: bool,
}

impl ContextEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard signal chain from configuration.
    ///
    /// Sources that are `None` are simply left out.
    pub fn standard(
        config: &SmartDelayConfig,
        calendar: Option<Arc<dyn CalendarSource>>,
        foreground: Option<Arc<dyn ForegroundAppSource>>,
        focus: Option<Arc<dyn FocusModeSource>>,
    ) -> Self {
        let mut evaluator = Self::new();
        evaluator.disabled = !config.enabled;

        let short = Duration::seconds(bounded_secs(config.short_recheck_secs, 1));
        let medium = Duration::seconds(bounded_secs(config.medium_recheck_secs, 1));

        if let (true, Some(source)) = (config.calendar, calendar) {
            evaluator.add_signal(CalendarSignal::new(
                source,
                Duration::seconds(bounded_secs(config.max_calendar_delay_secs, 60)),
            ));
        }
        if let Some(source) = foreground {
            if !config.excluded_apps.is_empty() {
                evaluator.add_signal(ExcludedAppSignal::new(
                    source.clone(),
                    config.excluded_apps.iter().cloned(),
                    short,
                ));
            }
            if config.fullscreen {
                evaluator.add_signal(FullscreenSignal::new(source.clone(), short));
            }
            if config.presentation && !config.presentation_apps.is_empty() {
                evaluator.add_signal(PresentationSignal::new(
                    source,
                    config.presentation_apps.iter().cloned(),
                    medium,
                ));
            }
        }
        if let (true, Some(source)) = (config.do_not_disturb, focus) {
            evaluator.add_signal(DoNotDisturbSignal::new(source, medium));
        }
        evaluator
    }

    /// Insert a signal, keeping the list sorted by descending priority.
    /// Signals of equal priority keep insertion order.
    pub fn add_signal(&mut self, signal: impl ContextSignal + 'static) {
        let priority = signal.priority();
        let at = self
            .signals
            .iter()
            .position(|s| s.priority() < priority)
            .unwrap_or(self.signals.len());
        self.signals.insert(at, Box::new(signal));
    }

    pub fn with_signal(mut self, signal: impl ContextSignal + 'static) -> Self {
        self.add_signal(signal);
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.disabled = !enabled;
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.name()).collect()
    }
}

impl DelayAdvisor for ContextEvaluator {
    fn evaluate(&self, now: DateTime<Utc>) -> DelayVerdict {
        if self.disabled {
            return DelayVerdict::Allow;
        }
        for signal in &self.signals {
            match signal.check(now) {
                Ok(Some(request)) => {
                    debug!(
                        signal = signal.name(),
                        reason = ?request.reason,
                        delay_secs = request.suggested_delay.num_seconds(),
                        "context requests delay"
                    );
                    return DelayVerdict::Delay(request);
                }
                Ok(None) => {}
                Err(err @ SignalError::Unauthorized { .. }) => {
                    debug!(signal = signal.name(), %err, "signal abstains");
                }
                Err(err) => {
                    warn!(signal = signal.name(), %err, "signal abstains");
                }
            }
        }
        DelayVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        priority: u8,
        answer: Result<Option<DelayReason>, SignalError>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(
            name: &'static str,
            priority: u8,
            answer: Result<Option<DelayReason>, SignalError>,
        ) -> Self {
            Self {
                name,
                priority,
                answer,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ContextSignal for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn check(&self, _now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map(|reason| {
                reason.map(|reason| DelayRequest {
                    reason,
                    suggested_delay: Duration::minutes(5),
                    confidence: 0.5,
                    detail: self.name.to_string(),
                })
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn empty_evaluator_allows() {
        assert!(ContextEvaluator::new().evaluate(now()).is_allow());
    }

    #[test]
    fn higher_priority_wins_regardless_of_insertion_order() {
        let evaluator = ContextEvaluator::new()
            .with_signal(Fixed::new("app", 80, Ok(Some(DelayReason::ExcludedApplication))))
            .with_signal(Fixed::new("calendar", 100, Ok(Some(DelayReason::CalendarEvent))));

        assert_eq!(evaluator.signal_names(), vec!["calendar", "app"]);
        assert_eq!(evaluator.evaluate(now()).reason(), Some(DelayReason::CalendarEvent));
    }

    #[test]
    fn short_circuits_after_first_delay() {
        let low = Fixed::new("dnd", 20, Ok(Some(DelayReason::DoNotDisturb)));
        let low_calls = low.calls.clone();
        let evaluator = ContextEvaluator::new()
            .with_signal(low)
            .with_signal(Fixed::new(
                "fullscreen",
                60,
                Ok(Some(DelayReason::FullscreenApplication)),
            ));

        assert_eq!(evaluator.evaluate(now()).reason(), Some(DelayReason::FullscreenApplication));
        assert_eq!(low_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_signal_abstains() {
        let evaluator = ContextEvaluator::new()
            .with_signal(Fixed::new(
                "calendar",
                100,
                Err(SignalError::Unauthorized {
                    source_name: "calendar".into(),
                }),
            ))
            .with_signal(Fixed::new("app", 80, Ok(Some(DelayReason::ExcludedApplication))));

        assert_eq!(evaluator.evaluate(now()).reason(), Some(DelayReason::ExcludedApplication));
    }

    #[test]
    fn all_clear_allows() {
        let evaluator = ContextEvaluator::new()
            .with_signal(Fixed::new("calendar", 100, Ok(None)))
            .with_signal(Fixed::new(
                "dnd",
                20,
                Err(SignalError::Unavailable {
                    source_name: "focus".into(),
                    message: "timeout".into(),
                }),
            ));
        assert!(evaluator.evaluate(now()).is_allow());
    }

    #[test]
    fn disabled_evaluator_always_allows() {
        let mut evaluator = ContextEvaluator::new()
            .with_signal(Fixed::new("calendar", 100, Ok(Some(DelayReason::CalendarEvent))));
        evaluator.set_enabled(false);
        assert!(evaluator.evaluate(now()).is_allow());
    }

    struct Front(&'static str);

    impl ForegroundAppSource for Front {
        fn frontmost_app(&self) -> Result<Option<AppInfo>, SignalError> {
            Ok(Some(AppInfo {
                bundle_id: self.0.into(),
                name: self.0.into(),
                fullscreen: false,
            }))
        }
    }

    struct FocusOn;

    impl FocusModeSource for FocusOn {
        fn focus_active(&self) -> Result<bool, SignalError> {
            Ok(true)
        }
    }

    struct AllDayMeeting;

    impl CalendarSource for AllDayMeeting {
        fn events_between(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>, SignalError> {
            Ok(vec![CalendarEvent::new(
                "m".into(),
                "Offsite".into(),
                now() - Duration::hours(1),
                now() + Duration::days(60),
            )])
        }
    }

    fn delay_of(verdict: DelayVerdict) -> Duration {
        match verdict {
            DelayVerdict::Delay(request) => request.suggested_delay,
            DelayVerdict::Allow => panic!("expected a delay"),
        }
    }

    const WEEK: i64 = crate::breaks::MAX_INTERVAL_SECS;

    #[test]
    fn oversized_short_recheck_is_capped() {
        let config = SmartDelayConfig {
            excluded_apps: vec!["editor".into()],
            short_recheck_secs: i64::MAX,
            ..SmartDelayConfig::default()
        };
        let evaluator =
            ContextEvaluator::standard(&config, None, Some(Arc::new(Front("editor"))), None);
        assert_eq!(delay_of(evaluator.evaluate(now())), Duration::seconds(WEEK));
    }

    #[test]
    fn oversized_medium_recheck_is_capped() {
        let config = SmartDelayConfig {
            medium_recheck_secs: i64::MAX,
            ..SmartDelayConfig::default()
        };
        let evaluator = ContextEvaluator::standard(&config, None, None, Some(Arc::new(FocusOn)));
        assert_eq!(delay_of(evaluator.evaluate(now())), Duration::seconds(WEEK));
    }

    #[test]
    fn oversized_calendar_limit_is_capped() {
        let config = SmartDelayConfig {
            max_calendar_delay_secs: i64::MAX,
            ..SmartDelayConfig::default()
        };
        let evaluator =
            ContextEvaluator::standard(&config, Some(Arc::new(AllDayMeeting)), None, None);
        assert_eq!(delay_of(evaluator.evaluate(now())), Duration::seconds(WEEK));
    }
}
