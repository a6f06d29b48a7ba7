use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::compiler::{CompileResult, Compiler};
use crate::config::{DEFAULT_TIMEOUT_MS, Preferences};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::judge::{ExecutionTarget, Judge, JudgeOutcome, RunResult};

/// Stable identifier of a test case, never reused within a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CaseId(pub u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub id: CaseId,
    pub input: String,
    pub expected_output: String,
    /// Latest committed result
    pub result: Option<RunResult>,
}

/// A judge run currently in flight for a case
#[derive(Debug)]
struct InFlight {
    seq: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Slot {
    case: TestCase,
    run: Option<InFlight>,
}

#[derive(Debug, Default)]
struct Table {
    /// Insertion order is display order
    slots: Vec<Slot>,
    next_id: u64,
    next_run: u64,
}

impl Table {
    fn get(&self, id: CaseId) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.case.id == id)
    }

    fn get_mut(&mut self, id: CaseId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.case.id == id)
    }
}

/// Ends the in-flight run of a case whose `run_case` future is dropped
/// before the judge returns, e.g. when its task is aborted.
struct RunGuard<'a> {
    manager: &'a CaseManager,
    id: CaseId,
    seq: u64,
    armed: bool,
}

impl RunGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = self.manager.table.lock();
        let Some(slot) = table
            .get_mut(self.id)
            .filter(|slot| slot.run.as_ref().is_some_and(|run| run.seq == self.seq))
        else {
            return;
        };
        if let Some(run) = slot.run.take() {
            run.cancel.cancel();
        }
        log::debug!("Case {}: run {} dropped", self.id, self.seq);
        self.manager.events.emit(Event::CaseNotRunning { id: self.id });
    }
}

/// Owns the test cases of the active source file and their judge runs.
///
/// Each case has at most one run in flight. Starting a run while another is
/// in flight cancels the old one, and a result is only committed if its run
/// is still the current one for the case, so stale results never overwrite
/// newer ones.
pub struct CaseManager {
    table: Mutex<Table>,
    /// Held shared by every run and exclusively by compilation
    target: RwLock<Option<ExecutionTarget>>,
    judge: Judge,
    events: EventSink,
    timeout_ms: AtomicU64,
}

impl CaseManager {
    pub fn new(events: EventSink) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            target: RwLock::new(None),
            judge: Judge::new(),
            events,
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_judge(mut self, judge: Judge) -> Self {
        self.judge = judge;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms.store(millis, Ordering::Relaxed);
    }

    pub fn add_case(
        &self,
        input: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> CaseId {
        let mut table = self.table.lock();
        let id = CaseId(table.next_id);
        table.next_id += 1;
        table.slots.push(Slot {
            case: TestCase {
                id,
                input: input.into(),
                expected_output: expected_output.into(),
                result: None,
            },
            run: None,
        });
        id
    }

    /// Replace the text of a case. Does not start a run.
    pub fn update_case(
        &self,
        id: CaseId,
        input: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Result<()> {
        let mut table = self.table.lock();
        let slot = table.get_mut(id).ok_or(Error::CaseNotFound(id))?;
        slot.case.input = input.into();
        slot.case.expected_output = expected_output.into();
        Ok(())
    }

    /// Delete a case, cancelling its run first
    pub fn remove_case(&self, id: CaseId) -> Result<TestCase> {
        let mut table = self.table.lock();
        let idx = table
            .slots
            .iter()
            .position(|slot| slot.case.id == id)
            .ok_or(Error::CaseNotFound(id))?;
        let slot = table.slots.remove(idx);
        if let Some(run) = slot.run {
            run.cancel.cancel();
        }
        Ok(slot.case)
    }

    pub fn get(&self, id: CaseId) -> Option<TestCase> {
        self.table.lock().get(id).map(|slot| slot.case.clone())
    }

    /// Snapshot of every case, in insertion order
    pub fn cases(&self) -> Vec<TestCase> {
        self.table
            .lock()
            .slots
            .iter()
            .map(|slot| slot.case.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<CaseId> {
        self.table
            .lock()
            .slots
            .iter()
            .map(|slot| slot.case.id)
            .collect()
    }

    pub fn is_running(&self, id: CaseId) -> bool {
        self.table
            .lock()
            .get(id)
            .is_some_and(|slot| slot.run.is_some())
    }

    /// Install the command judge runs execute
    pub async fn set_target(&self, target: Option<ExecutionTarget>) {
        *self.target.write().await = target;
    }

    /// Rebuild the source file.
    ///
    /// In-flight runs are stopped and no run starts until compilation has
    /// finished. On success the new target is installed; otherwise there is
    /// nothing to run until the next successful compile.
    pub async fn compile(
        &self,
        compiler: &Compiler,
        source_path: &Path,
        prefs: &Preferences,
    ) -> Result<CompileResult> {
        self.stop_all();
        let mut target = self.target.write().await;
        *target = None;
        self.set_timeout(prefs.timeout());

        let result = compiler.compile(source_path, prefs).await?;
        if result.success {
            *target = Some(ExecutionTarget::for_source(source_path, prefs)?);
        }
        Ok(result)
    }

    /// Judge one case against the current target.
    ///
    /// Returns `None` when the run was cancelled or superseded before its
    /// result could be committed.
    pub async fn run_case(&self, id: CaseId) -> Result<Option<RunResult>> {
        let target = self.target.read().await;
        let target = target.as_ref().ok_or(Error::NotCompiled)?;

        let (seq, cancel, input, expected_output) = {
            let mut table = self.table.lock();
            let seq = table.next_run;
            table.next_run += 1;

            let slot = table.get_mut(id).ok_or(Error::CaseNotFound(id))?;
            if let Some(previous) = slot.run.take() {
                log::debug!("Case {id}: run {} superseded by run {seq}", previous.seq);
                previous.cancel.cancel();
            }
            let cancel = CancellationToken::new();
            slot.run = Some(InFlight {
                seq,
                cancel: cancel.clone(),
            });
            self.events.emit(Event::CaseRunning { id });

            (
                seq,
                cancel,
                slot.case.input.clone(),
                slot.case.expected_output.clone(),
            )
        };

        let guard = RunGuard {
            manager: self,
            id,
            seq,
            armed: true,
        };
        let outcome = self
            .judge
            .run(target, &input, &expected_output, self.timeout(), &cancel)
            .await;
        guard.disarm();

        let result = match outcome {
            Ok(JudgeOutcome::Finished(result)) => result,
            Ok(JudgeOutcome::Cancelled) => return Ok(None),
            Err(error) => {
                log::error!("Case {id}: {error}");
                RunResult::from_error(&error)
            }
        };

        let mut table = self.table.lock();
        match table.get_mut(id) {
            Some(slot) if slot.run.as_ref().is_some_and(|run| run.seq == seq) => {
                slot.run = None;
                slot.case.result = Some(result.clone());
                log::info!(
                    "Case {id}: {} in {}ms",
                    result.verdict(),
                    result.elapsed_ms
                );
                self.events.emit(Event::CaseResult {
                    id,
                    result: result.clone(),
                });
                Ok(Some(result))
            }
            _ => {
                log::debug!("Case {id}: discarding stale result of run {seq}");
                Ok(None)
            }
        }
    }

    /// Judge every case concurrently.
    ///
    /// Cases are independent: an error, crash or timeout in one never
    /// affects the others. Results come back in case order.
    pub async fn run_all(self: &Arc<Self>) -> Vec<(CaseId, Result<Option<RunResult>>)> {
        let mut runs = JoinSet::new();
        for id in self.ids() {
            let manager = Arc::clone(self);
            runs.spawn(async move { (id, manager.run_case(id).await) });
        }

        let mut results = Vec::with_capacity(runs.len());
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => log::error!("Judge task failed: {e}"),
            }
        }
        results.sort_by_key(|(id, _)| *id);
        results
    }

    /// Kill the in-flight run of a case, if any
    pub fn cancel_case(&self, id: CaseId) -> Result<bool> {
        let mut table = self.table.lock();
        let slot = table.get_mut(id).ok_or(Error::CaseNotFound(id))?;
        match slot.run.take() {
            Some(run) => {
                run.cancel.cancel();
                self.events.emit(Event::CaseNotRunning { id });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Kill every in-flight run. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut table = self.table.lock();
        let mut stopped = 0;
        for slot in table.slots.iter_mut() {
            if let Some(run) = slot.run.take() {
                run.cancel.cancel();
                self.events.emit(Event::CaseNotRunning { id: slot.case.id });
                stopped += 1;
            }
        }
        if stopped > 0 {
            log::info!("Stopped {stopped} running case(s)");
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_never_reused() {
        let manager = CaseManager::new(EventSink::disconnected());
        let a = manager.add_case("1", "1");
        let b = manager.add_case("2", "2");
        assert_ne!(a, b);

        manager.remove_case(b).unwrap();
        let c = manager.add_case("3", "3");
        assert_ne!(c, b);
        assert_eq!(manager.ids(), vec![a, c]);
    }

    #[test]
    fn test_update_case_text() {
        let manager = CaseManager::new(EventSink::disconnected());
        let id = manager.add_case("1 2\n", "3\n");
        manager.update_case(id, "2 2\n", "4\n").unwrap();

        let case = manager.get(id).unwrap();
        assert_eq!(case.input, "2 2\n");
        assert_eq!(case.expected_output, "4\n");
        assert_eq!(case.result, None);
        assert!(!manager.is_running(id));
    }

    #[test]
    fn test_unknown_case() {
        let manager = CaseManager::new(EventSink::disconnected());
        let missing = CaseId(42);
        assert!(matches!(
            manager.update_case(missing, "", ""),
            Err(Error::CaseNotFound(CaseId(42)))
        ));
        assert!(matches!(
            manager.remove_case(missing),
            Err(Error::CaseNotFound(_))
        ));
        assert!(matches!(
            manager.cancel_case(missing),
            Err(Error::CaseNotFound(_))
        ));
        assert!(manager.get(missing).is_none());
    }

    #[test]
    fn test_cases_keep_insertion_order() {
        let manager = CaseManager::new(EventSink::disconnected());
        for i in 0..5 {
            manager.add_case(i.to_string(), i.to_string());
        }
        let inputs: Vec<_> = manager.cases().into_iter().map(|c| c.input).collect();
        assert_eq!(inputs, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_run_before_compile() {
        let manager = CaseManager::new(EventSink::disconnected());
        let id = manager.add_case("", "");
        assert!(matches!(manager.run_case(id).await, Err(Error::NotCompiled)));
        assert!(!manager.is_running(id));
    }

    #[tokio::test]
    async fn test_failed_compile_clears_target() {
        let (events, _rx) = EventSink::channel();
        let manager = CaseManager::new(events.clone());
        manager
            .set_target(Some(ExecutionTarget::command("true", Vec::<String>::new())))
            .await;

        let compiler = Compiler::new(events);
        let result = manager
            .compile(&compiler, Path::new("notes.txt"), &Preferences::default())
            .await;
        assert!(matches!(result, Err(Error::UnsupportedLanguage(_))));

        let id = manager.add_case("", "");
        assert!(matches!(manager.run_case(id).await, Err(Error::NotCompiled)));
    }

    #[tokio::test]
    async fn test_compile_applies_timeout_preference() {
        let manager = CaseManager::new(EventSink::disconnected());
        let compiler = Compiler::new(EventSink::disconnected());
        let prefs = Preferences {
            timeout_ms: 1234,
            ..Default::default()
        };
        let result = manager
            .compile(&compiler, Path::new("/w/sol.py"), &prefs)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(manager.timeout(), Duration::from_millis(1234));
    }
}
