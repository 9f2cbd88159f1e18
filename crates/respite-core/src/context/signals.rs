//! Standard context signals and the collaborator traits behind them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ContextSignal, DelayReason, DelayRequest};
use crate::error::SignalError;

const CALENDAR_PRIORITY: u8 = 100;
const EXCLUDED_APP_PRIORITY: u8 = 80;
const FULLSCREEN_PRIORITY: u8 = 60;
const PRESENTATION_PRIORITY: u8 = 40;
const DND_PRIORITY: u8 = 20;

/// Shortest delay a meeting conflict may suggest.
const MIN_CALENDAR_DELAY_SECS: i64 = 60;

// ── Collaborators ───────────────────────────────────────────────────

/// Calendar event for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    /// Free/tentative events do not block breaks.
    #[serde(default = "default_true")]
    pub busy: bool,
}

fn default_true() -> bool {
    true
}

impl CalendarEvent {
    pub fn new(
        id: String,
        title: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title,
            start_time,
            end_time,
            all_day: false,
            busy: true,
        }
    }

    /// Check if this event overlaps with a time range
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }

    pub fn in_progress(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

/// Read access to the user's calendar.
pub trait CalendarSource: Send + Sync {
    /// Events overlapping `[start, end)`. Unauthorized access is an error.
    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, SignalError>;
}

/// The application that currently has focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Platform identifier, e.g. a bundle id or executable name.
    pub bundle_id: String,
    pub name: String,
    #[serde(default)]
    pub fullscreen: bool,
}

pub trait ForegroundAppSource: Send + Sync {
    fn frontmost_app(&self) -> Result<Option<AppInfo>, SignalError>;
}

/// System do-not-disturb / focus mode.
pub trait FocusModeSource: Send + Sync {
    fn focus_active(&self) -> Result<bool, SignalError>;
}

// ── Signals ─────────────────────────────────────────────────────────

/// Delays breaks while a busy meeting is in progress.
pub struct CalendarSignal {
    source: Arc<dyn CalendarSource>,
    max_delay: Duration,
}

impl CalendarSignal {
    pub fn new(source: Arc<dyn CalendarSource>, max_delay: Duration) -> Self {
        Self { source, max_delay }
    }
}

impl ContextSignal for CalendarSignal {
    fn name(&self) -> &str {
        "calendar"
    }

    fn priority(&self) -> u8 {
        CALENDAR_PRIORITY
    }

    fn check(&self, now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
        let events = self
            .source
            .events_between(now, now + Duration::seconds(1))?;

        let conflict = events
            .iter()
            .filter(|e| e.busy && !e.all_day && e.in_progress(now))
            .max_by_key(|e| e.end_time);

        Ok(conflict.map(|event| {
            let min = Duration::seconds(MIN_CALENDAR_DELAY_SECS);
            let until_end = event.end_time - now;
            DelayRequest {
                reason: DelayReason::CalendarEvent,
                suggested_delay: until_end.clamp(min, self.max_delay.max(min)),
                confidence: 0.95,
                detail: event.title.clone(),
            }
        }))
    }
}

fn normalized(ids: impl IntoIterator<Item = String>) -> HashSet<String> {
    ids.into_iter()
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect()
}

fn app_matches(app: &AppInfo, set: &HashSet<String>) -> bool {
    set.contains(&app.bundle_id.to_lowercase()) || set.contains(&app.name.to_lowercase())
}

/// Delays breaks while a user-listed application is in front.
pub struct ExcludedAppSignal {
    source: Arc<dyn ForegroundAppSource>,
    excluded: HashSet<String>,
    recheck: Duration,
}

impl ExcludedAppSignal {
    pub fn new(
        source: Arc<dyn ForegroundAppSource>,
        excluded: impl IntoIterator<Item = String>,
        recheck: Duration,
    ) -> Self {
        Self {
            source,
            excluded: normalized(excluded),
            recheck,
        }
    }
}

impl ContextSignal for ExcludedAppSignal {
    fn name(&self) -> &str {
        "excluded_app"
    }

    fn priority(&self) -> u8 {
        EXCLUDED_APP_PRIORITY
    }

    fn check(&self, _now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
        let Some(app) = self.source.frontmost_app()? else {
            return Ok(None);
        };
        if !app_matches(&app, &self.excluded) {
            return Ok(None);
        }
        Ok(Some(DelayRequest {
            reason: DelayReason::ExcludedApplication,
            suggested_delay: self.recheck,
            confidence: 0.9,
            detail: app.name,
        }))
    }
}

/// Delays breaks while the front application is fullscreen.
pub struct FullscreenSignal {
    source: Arc<dyn ForegroundAppSource>,
    recheck: Duration,
}

impl FullscreenSignal {
    pub fn new(source: Arc<dyn ForegroundAppSource>, recheck: Duration) -> Self {
        Self { source, recheck }
    }
}

impl ContextSignal for FullscreenSignal {
    fn name(&self) -> &str {
        "fullscreen"
    }

    fn priority(&self) -> u8 {
        FULLSCREEN_PRIORITY
    }

    fn check(&self, _now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
        Ok(self
            .source
            .frontmost_app()?
            .filter(|app| app.fullscreen)
            .map(|app| DelayRequest {
                reason: DelayReason::FullscreenApplication,
                suggested_delay: self.recheck,
                confidence: 0.7,
                detail: app.name,
            }))
    }
}

/// Delays breaks while a known presentation tool is in front.
pub struct PresentationSignal {
    source: Arc<dyn ForegroundAppSource>,
    presenters: HashSet<String>,
    recheck: Duration,
}

impl PresentationSignal {
    pub fn new(
        source: Arc<dyn ForegroundAppSource>,
        presenters: impl IntoIterator<Item = String>,
        recheck: Duration,
    ) -> Self {
        Self {
            source,
            presenters: normalized(presenters),
            recheck,
        }
    }
}

impl ContextSignal for PresentationSignal {
    fn name(&self) -> &str {
        "presentation"
    }

    fn priority(&self) -> u8 {
        PRESENTATION_PRIORITY
    }

    fn check(&self, _now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
        Ok(self
            .source
            .frontmost_app()?
            .filter(|app| app_matches(app, &self.presenters))
            .map(|app| DelayRequest {
                reason: DelayReason::PresentationMode,
                suggested_delay: self.recheck,
                confidence: 0.8,
                detail: app.name,
            }))
    }
}

/// Delays breaks while the system focus mode is on.
pub struct DoNotDisturbSignal {
    source: Arc<dyn FocusModeSource>,
    recheck: Duration,
}

impl DoNotDisturbSignal {
    pub fn new(source: Arc<dyn FocusModeSource>, recheck: Duration) -> Self {
        Self { source, recheck }
    }
}

impl ContextSignal for DoNotDisturbSignal {
    fn name(&self) -> &str {
        "do_not_disturb"
    }

    fn priority(&self) -> u8 {
        DND_PRIORITY
    }

    fn check(&self, _now: DateTime<Utc>) -> Result<Option<DelayRequest>, SignalError> {
        if !self.source.focus_active()? {
            return Ok(None);
        }
        Ok(Some(DelayRequest {
            reason: DelayReason::DoNotDisturb,
            suggested_delay: self.recheck,
            confidence: 0.6,
            detail: "focus mode".into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextEvaluator, DelayAdvisor};
    use crate::storage::SmartDelayConfig;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
    }

    struct StaticCalendar(Result<Vec<CalendarEvent>, SignalError>);

    impl CalendarSource for StaticCalendar {
        fn events_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>, SignalError> {
            self.0
                .clone()
                .map(|events| events.into_iter().filter(|e| e.overlaps(start, end)).collect())
        }
    }

    struct StaticApp(Option<AppInfo>);

    impl ForegroundAppSource for StaticApp {
        fn frontmost_app(&self) -> Result<Option<AppInfo>, SignalError> {
            Ok(self.0.clone())
        }
    }

    struct StaticFocus(bool);

    impl FocusModeSource for StaticFocus {
        fn focus_active(&self) -> Result<bool, SignalError> {
            Ok(self.0)
        }
    }

    fn meeting(start_min: i64, end_min: i64) -> CalendarEvent {
        CalendarEvent::new(
            format!("evt-{start_min}"),
            "Standup".into(),
            now() + Duration::minutes(start_min),
            now() + Duration::minutes(end_min),
        )
    }

    fn app(bundle_id: &str, fullscreen: bool) -> AppInfo {
        AppInfo {
            bundle_id: bundle_id.into(),
            name: bundle_id.rsplit('.').next().unwrap_or(bundle_id).into(),
            fullscreen,
        }
    }

    #[test]
    fn meeting_in_progress_delays_until_its_end() {
        let signal = CalendarSignal::new(
            Arc::new(StaticCalendar(Ok(vec![meeting(-10, 25)]))),
            Duration::hours(2),
        );
        let req = signal.check(now()).unwrap().unwrap();
        assert_eq!(req.reason, DelayReason::CalendarEvent);
        assert_eq!(req.suggested_delay, Duration::minutes(25));
        assert_eq!(req.detail, "Standup");
    }

    #[test]
    fn meeting_delay_is_bounded() {
        let long = CalendarSignal::new(
            Arc::new(StaticCalendar(Ok(vec![meeting(-10, 600)]))),
            Duration::hours(2),
        );
        assert_eq!(long.check(now()).unwrap().unwrap().suggested_delay, Duration::hours(2));

        let mut almost_over = meeting(-30, 0);
        almost_over.end_time = now() + Duration::seconds(5);
        let short = CalendarSignal::new(
            Arc::new(StaticCalendar(Ok(vec![almost_over]))),
            Duration::hours(2),
        );
        assert_eq!(short.check(now()).unwrap().unwrap().suggested_delay, Duration::seconds(60));
    }

    #[test]
    fn free_all_day_and_future_events_do_not_conflict() {
        let mut free = meeting(-5, 5);
        free.busy = false;
        let mut all_day = meeting(-600, 600);
        all_day.all_day = true;
        let later = meeting(30, 60);

        let signal = CalendarSignal::new(
            Arc::new(StaticCalendar(Ok(vec![free, all_day, later]))),
            Duration::hours(2),
        );
        assert_eq!(signal.check(now()).unwrap(), None);
    }

    #[test]
    fn overlapping_meetings_delay_until_the_latest_end() {
        let signal = CalendarSignal::new(
            Arc::new(StaticCalendar(Ok(vec![meeting(-10, 20), meeting(-5, 45)]))),
            Duration::hours(2),
        );
        assert_eq!(signal.check(now()).unwrap().unwrap().suggested_delay, Duration::minutes(45));
    }

    #[test]
    fn excluded_app_matches_bundle_or_name_case_insensitively() {
        let source = Arc::new(StaticApp(Some(app("com.apple.FinalCut", false))));
        let signal = ExcludedAppSignal::new(
            source,
            vec!["com.apple.finalcut".to_string()],
            Duration::minutes(5),
        );
        let req = signal.check(now()).unwrap().unwrap();
        assert_eq!(req.reason, DelayReason::ExcludedApplication);
        assert_eq!(req.suggested_delay, Duration::minutes(5));

        let by_name = ExcludedAppSignal::new(
            Arc::new(StaticApp(Some(app("org.videolan.VLC", false)))),
            vec!["vlc".to_string()],
            Duration::minutes(5),
        );
        assert!(by_name.check(now()).unwrap().is_some());
    }

    #[test]
    fn fullscreen_only_fires_for_fullscreen_apps() {
        let windowed = FullscreenSignal::new(
            Arc::new(StaticApp(Some(app("a.b.Editor", false)))),
            Duration::minutes(5),
        );
        assert_eq!(windowed.check(now()).unwrap(), None);

        let full = FullscreenSignal::new(
            Arc::new(StaticApp(Some(app("a.b.Game", true)))),
            Duration::minutes(5),
        );
        assert_eq!(
            full.check(now()).unwrap().unwrap().reason,
            DelayReason::FullscreenApplication
        );

        let nothing = FullscreenSignal::new(Arc::new(StaticApp(None)), Duration::minutes(5));
        assert_eq!(nothing.check(now()).unwrap(), None);
    }

    #[test]
    fn presentation_and_dnd_use_medium_recheck() {
        let keynote = PresentationSignal::new(
            Arc::new(StaticApp(Some(app("com.apple.iWork.Keynote", false)))),
            vec!["com.apple.iWork.Keynote".to_string()],
            Duration::minutes(10),
        );
        let req = keynote.check(now()).unwrap().unwrap();
        assert_eq!(req.reason, DelayReason::PresentationMode);
        assert_eq!(req.suggested_delay, Duration::minutes(10));

        let dnd = DoNotDisturbSignal::new(Arc::new(StaticFocus(true)), Duration::minutes(10));
        assert_eq!(dnd.check(now()).unwrap().unwrap().reason, DelayReason::DoNotDisturb);
        let quiet = DoNotDisturbSignal::new(Arc::new(StaticFocus(false)), Duration::minutes(10));
        assert_eq!(quiet.check(now()).unwrap(), None);
    }

    #[test]
    fn standard_chain_prefers_meeting_over_excluded_app() {
        let config = SmartDelayConfig {
            excluded_apps: vec!["com.example.Blocked".into()],
            ..SmartDelayConfig::default()
        };
        let evaluator = ContextEvaluator::standard(
            &config,
            Some(Arc::new(StaticCalendar(Ok(vec![meeting(-1, 30)])))),
            Some(Arc::new(StaticApp(Some(app("com.example.Blocked", true))))),
            Some(Arc::new(StaticFocus(true))),
        );
        assert_eq!(evaluator.evaluate(now()).reason(), Some(DelayReason::CalendarEvent));
    }

    #[test]
    fn standard_chain_skips_unauthorized_calendar() {
        let config = SmartDelayConfig {
            excluded_apps: vec!["com.example.Blocked".into()],
            ..SmartDelayConfig::default()
        };
        let evaluator = ContextEvaluator::standard(
            &config,
            Some(Arc::new(StaticCalendar(Err(SignalError::Unauthorized {
                source_name: "calendar".into(),
            })))),
            Some(Arc::new(StaticApp(Some(app("com.example.Blocked", false))))),
            None,
        );
        assert_eq!(
            evaluator.evaluate(now()).reason(),
            Some(DelayReason::ExcludedApplication)
        );
    }
}
