//! Unit and integration test runner.

use super::SessionOrchestrator;
use crate::config::TestDbConfig;
use crate::output::UserOutput;
use crate::platform::CommandSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct SuiteOptions {
    pub unit_only: bool,
    pub integration_only: bool,
    /// Assume the test database is already set up.
    pub skip_db: bool,
    /// Never try to start or install the engine.
    pub no_auto_install: bool,
}

impl SuiteOptions {
    fn run_unit(&self) -> bool {
        !self.integration_only
    }

    fn run_integration(&self) -> bool {
        !self.unit_only
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
    /// Integration tests skipped because the database could not be prepared.
    Skipped,
    NotRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteOutcome {
    pub unit: TestOutcome,
    pub integration: TestOutcome,
}

impl SuiteOutcome {
    /// 1 unit failed, 2 integration failed, 3 database setup failed, else 0,
    /// checked in that order.
    pub fn exit_code(&self) -> i32 {
        if self.unit == TestOutcome::Failed {
            1
        } else if self.integration == TestOutcome::Failed {
            2
        } else if self.integration == TestOutcome::Skipped {
            3
        } else {
            0
        }
    }
}

impl SessionOrchestrator {
    pub async fn run_test_suite(
        &self,
        options: SuiteOptions,
        test_db: &TestDbConfig,
        out: &dyn UserOutput,
    ) -> SuiteOutcome {
        let mut outcome = SuiteOutcome {
            unit: TestOutcome::NotRun,
            integration: TestOutcome::NotRun,
        };

        if options.run_unit() {
            out.blank();
            out.status("── Running Unit Tests ──");
            let argv = &self.project.config.unit_test_command;
            outcome.unit = self.run_tests("Unit tests", argv, Vec::new(), out).await;
        }

        if options.run_integration() {
            let db_ready = options.skip_db || self.prepare_test_db(options, test_db, out).await;
            outcome.integration = if db_ready {
                out.blank();
                out.status("── Running Integration Tests ──");
                let argv = &self.project.config.integration_test_command;
                self.run_tests("Integration tests", argv, test_db.env(), out)
                    .await
            } else {
                TestOutcome::Skipped
            };
        }

        out.blank();
        out.status("── Test Summary ──");
        summarize("Unit tests", outcome.unit, out);
        summarize("Integration tests", outcome.integration, out);
        outcome
    }

    async fn prepare_test_db(
        &self,
        options: SuiteOptions,
        test_db: &TestDbConfig,
        out: &dyn UserOutput,
    ) -> bool {
        if !self.gateway.is_engine_running().await {
            if options.no_auto_install {
                out.warning("PostgreSQL is not running and --no-auto-install was specified");
                out.warning("Skipping integration tests");
                return false;
            }
            if let Err(e) = self.engine_start(out).await {
                out.status(&format!("Could not start PostgreSQL ({}), trying to install it", e));
                if let Err(e) = self.engine_install(true, out).await {
                    out.warning(&format!(
                        "Failed to start PostgreSQL, skipping integration tests: {}",
                        e
                    ));
                    return false;
                }
            }
        }

        out.status("Setting up test database...");
        match self.setup_test_db(test_db, out).await {
            Ok(()) => true,
            Err(e) => {
                out.warning(&format!(
                    "Database setup failed, skipping integration tests: {}",
                    e
                ));
                false
            }
        }
    }

    async fn run_tests(
        &self,
        label: &str,
        argv: &[String],
        env: Vec<(String, String)>,
        out: &dyn UserOutput,
    ) -> TestOutcome {
        let spec = match CommandSpec::from_argv(argv) {
            Ok(spec) => spec.cwd(&self.project.root).envs(env),
            Err(e) => {
                out.error(&format!("{}: {}", label, e));
                return TestOutcome::Failed;
            }
        };
        match self.runner.run_streaming(&spec, &|line| out.line(line)).await {
            Ok(Some(0)) => {
                out.success(&format!("{} passed", label));
                TestOutcome::Passed
            }
            Ok(_) => {
                out.error(&format!("{} failed", label));
                TestOutcome::Failed
            }
            Err(e) => {
                out.error(&format!("{} could not run: {}", label, e));
                TestOutcome::Failed
            }
        }
    }
}

fn summarize(label: &str, outcome: TestOutcome, out: &dyn UserOutput) {
    match outcome {
        TestOutcome::Passed => out.success(&format!("{}: passed", label)),
        TestOutcome::Failed => out.error(&format!("{}: failed", label)),
        TestOutcome::Skipped => out.warning(&format!("{}: skipped (DB setup failed)", label)),
        TestOutcome::NotRun => {}
    }
}
