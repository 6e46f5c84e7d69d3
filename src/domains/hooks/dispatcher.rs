use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{HookContext, HookHandler, HookOutcome, HookStage};
use crate::domains::sessions::entity::Session;
use crate::errors::{DevtoolError, DevtoolResult};

struct Registration {
    stage: HookStage,
    name: String,
    handler: Arc<dyn HookHandler>,
    order: i32,
    required: bool,
    seq: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookReport {
    pub name: String,
    pub stage: HookStage,
    pub outcome: HookOutcome,
    pub required: bool,
}

impl HookReport {
    pub fn is_warning(&self) -> bool {
        self.outcome.is_failure() && !self.required
    }
}

/// Ordered registry of `(stage, handler)` pairs. Handlers at one stage run in
/// ascending `order`, ties keep registration order.
pub struct HookDispatcher {
    registrations: Vec<Registration>,
    hook_timeout: Duration,
}

impl HookDispatcher {
    pub fn new(hook_timeout: Duration) -> Self {
        Self {
            registrations: Vec::new(),
            hook_timeout,
        }
    }

    pub fn register(
        &mut self,
        stage: HookStage,
        name: &str,
        handler: Arc<dyn HookHandler>,
        order: i32,
        required: bool,
    ) {
        debug!("Registered hook '{name}' at {stage} (order {order}, required {required})");
        let seq = self.registrations.len();
        self.registrations.push(Registration {
            stage,
            name: name.to_string(),
            handler,
            order,
            required,
            seq,
        });
    }

    pub fn registered(&self, stage: HookStage) -> Vec<(String, i32, bool)> {
        self.ordered(stage)
            .into_iter()
            .map(|r| (r.name.clone(), r.order, r.required))
            .collect()
    }

    fn ordered(&self, stage: HookStage) -> Vec<&Registration> {
        let mut selected: Vec<&Registration> = self
            .registrations
            .iter()
            .filter(|r| r.stage == stage)
            .collect();
        selected.sort_by_key(|r| (r.order, r.seq));
        selected
    }

    /// Run every handler for `stage` against `session`. Draft text appended
    /// by handlers is applied to `session` as each handler completes. The first
    /// failing required handler stops the dispatch with `HookFailed`; other
    /// failures come back as warning reports.
    pub async fn dispatch(
        &self,
        stage: HookStage,
        session: &mut Session,
    ) -> DevtoolResult<Vec<HookReport>> {
        let mut reports = Vec::new();

        for registration in self.ordered(stage) {
            let snapshot = session.clone();
            let mut ctx = HookContext::new(stage, &snapshot);

            let outcome = match timeout(self.hook_timeout, registration.handler.run(&mut ctx)).await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => HookOutcome::Failed(format!("{err:#}")),
                Err(_) => HookOutcome::Failed(format!(
                    "timed out after {}s",
                    self.hook_timeout.as_secs()
                )),
            };

            if !outcome.is_failure() {
                for text in ctx.into_draft_additions() {
                    session.append_to_draft(&text);
                }
            }

            match &outcome {
                HookOutcome::Failed(reason) if registration.required => {
                    warn!(
                        "Required hook '{}' failed at {stage} for session '{}': {reason}",
                        registration.name, session.id
                    );
                    return Err(DevtoolError::HookFailed {
                        session_id: session.id.clone(),
                        stage: stage.to_string(),
                        hook: registration.name.clone(),
                        message: reason.clone(),
                    });
                }
                HookOutcome::Failed(reason) => {
                    warn!(
                        "Hook '{}' failed at {stage} for session '{}' (continuing): {reason}",
                        registration.name, session.id
                    );
                }
                other => {
                    info!(
                        "Hook '{}' at {stage} for session '{}': {other}",
                        registration.name, session.id
                    );
                }
            }

            reports.push(HookReport {
                name: registration.name.clone(),
                stage,
                outcome,
                required: registration.required,
            });
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        result: Result<(), &'static str>,
        draft: Option<&'static str>,
    }

    #[async_trait]
    impl HookHandler for Recorder {
        async fn run(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<HookOutcome> {
            self.log.lock().unwrap().push(self.label);
            if let Some(text) = self.draft {
                ctx.append_to_draft(text);
            }
            match self.result {
                Ok(()) => Ok(HookOutcome::Ok),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }
    }

    struct Sleeper;

    #[async_trait]
    impl HookHandler for Sleeper {
        async fn run(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<HookOutcome> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HookOutcome::Ok)
        }
    }

    fn session() -> Session {
        Session::new_created(
            "250906-x",
            PathBuf::from("/repos/app"),
            PathBuf::from("/wt/250906-x"),
            Utc::now(),
        )
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        result: Result<(), &'static str>,
    ) -> Arc<dyn HookHandler> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
            result,
            draft: None,
        })
    }

    #[tokio::test]
    async fn runs_in_ascending_order_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new(Duration::from_secs(5));
        dispatcher.register(HookStage::PreStart, "c", recorder("c", &log, Ok(())), 10, false);
        dispatcher.register(HookStage::PreStart, "a", recorder("a", &log, Ok(())), -1, false);
        dispatcher.register(HookStage::PreStart, "b1", recorder("b1", &log, Ok(())), 5, false);
        dispatcher.register(HookStage::PreStart, "b2", recorder("b2", &log, Ok(())), 5, false);
        dispatcher.register(HookStage::PostStart, "z", recorder("z", &log, Ok(())), 0, false);

        let mut s = session();
        let reports = dispatcher.dispatch(HookStage::PreStart, &mut s).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b1", "b2", "c"]);
        assert_eq!(reports.len(), 4);
    }

    #[tokio::test]
    async fn optional_failure_is_reported_as_warning() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new(Duration::from_secs(5));
        dispatcher.register(HookStage::PreFinish, "flaky", recorder("flaky", &log, Err("nope")), 0, false);
        dispatcher.register(HookStage::PreFinish, "after", recorder("after", &log, Ok(())), 1, false);

        let mut s = session();
        let reports = dispatcher.dispatch(HookStage::PreFinish, &mut s).await.unwrap();
        assert!(reports[0].is_warning());
        assert!(!reports[1].is_warning());
        assert_eq!(*log.lock().unwrap(), vec!["flaky", "after"]);
    }

    #[tokio::test]
    async fn required_failure_aborts_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new(Duration::from_secs(5));
        dispatcher.register(HookStage::PreFinish, "lint", recorder("lint", &log, Err("exit 1")), 0, true);
        dispatcher.register(HookStage::PreFinish, "never", recorder("never", &log, Ok(())), 1, false);

        let mut s = session();
        let err = dispatcher.dispatch(HookStage::PreFinish, &mut s).await.unwrap_err();
        match err {
            DevtoolError::HookFailed { hook, stage, .. } => {
                assert_eq!(hook, "lint");
                assert_eq!(stage, "pre-finish");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["lint"]);
    }

    #[tokio::test]
    async fn successful_handlers_append_to_draft() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new(Duration::from_secs(5));
        dispatcher.register(
            HookStage::PreFinish,
            "drafter",
            Arc::new(Recorder {
                label: "drafter",
                log: log.clone(),
                result: Ok(()),
                draft: Some("hook notes"),
            }),
            0,
            false,
        );

        let mut s = session();
        s.commit_message_draft = "operator notes".into();
        dispatcher.dispatch(HookStage::PreFinish, &mut s).await.unwrap();
        assert_eq!(s.commit_message_draft, "operator notes\nhook notes");
    }

    #[tokio::test]
    async fn slow_handler_times_out_as_failure() {
        let mut dispatcher = HookDispatcher::new(Duration::from_millis(20));
        dispatcher.register(HookStage::PostStart, "slow", Arc::new(Sleeper), 0, false);

        let mut s = session();
        let reports = dispatcher.dispatch(HookStage::PostStart, &mut s).await.unwrap();
        assert!(matches!(&reports[0].outcome, HookOutcome::Failed(msg) if msg.contains("timed out")));
    }
}
