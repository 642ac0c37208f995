//! Fake external tools for engine and step tests.
//!
//! [`FakeRunner`] stands in for every program the pipeline calls and writes
//! small but well-formed outputs where the real tool would.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::environment::{CommandRunner, ExternalTool, Invocation, ProcessOutput};
use crate::error::Result;
use crate::formats::vcf::tests::vcf_text;

/// Records invocations, fakes their outputs, and fails on request.
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<(ExternalTool, String)>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every call of `tool` whose command line contains `needle` exit 1.
    pub(crate) fn fail_when(&self, tool: ExternalTool, needle: &str) {
        self.failures.lock().unwrap().push((tool, needle.to_string()));
    }

    pub(crate) fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of recorded calls of one tool.
    pub(crate) fn count(&self, tool: ExternalTool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.tool == tool).count()
    }

    /// Calls of the three estimators.
    pub(crate) fn estimator_calls(&self) -> usize {
        [ExternalTool::Java, ExternalTool::Smcpp, ExternalTool::Msmc]
            .iter()
            .map(|&t| self.count(t))
            .sum()
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn should_fail(&self, invocation: &Invocation) -> bool {
        let line = invocation.command_line();
        self.failures
            .lock()
            .unwrap()
            .iter()
            .any(|(tool, needle)| *tool == invocation.tool && line.contains(needle.as_str()))
    }
}

/// Four diploid samples with sites segregating in every sub-sample.
pub(crate) fn fake_vcf(chrom: &str) -> String {
    vcf_text(
        chrom,
        1000,
        4,
        &[
            (100, vec!["0|1", "0|0", "1|0", "0|0"]),
            (250, vec!["1|1", "0|1", "0|0", "1|0"]),
            (400, vec!["0|0", "1|0", "0|0", "0|1"]),
            (700, vec!["0|1", "1|1", "1|1", "0|0"]),
        ],
    )
}

fn arg_after(invocation: &Invocation, flag: &str) -> Option<PathBuf> {
    let idx = invocation.args.iter().position(|a| a == flag)?;
    invocation.args.get(idx + 1).map(PathBuf::from)
}

fn write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Plays the stairway run script: writes the summary the blueprint asks for.
fn run_blueprint_script(invocation: &Invocation) -> Result<()> {
    let dir = invocation.working_dir.clone().unwrap_or_default();
    let script = invocation.args.first().cloned().unwrap_or_default();
    let blueprint = fs::read_to_string(dir.join(script.trim_end_matches(".sh")))?;

    let field = |key: &str| {
        blueprint
            .lines()
            .find_map(|l| l.strip_prefix(key))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };
    let popid = field("popid:");
    let project_dir = PathBuf::from(field("project_dir:"));

    write(
        &project_dir.join(format!("{}.final.summary", popid)),
        "mutation_per_site\ttheta_per_site_median\n1.0e-6\t4.0e-4\n2.0e-5\t2.0e-4\n",
    )
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        if self.should_fail(invocation) {
            return Ok(ProcessOutput {
                status_code: Some(1),
                stdout: String::new(),
                stderr: "injected failure".to_string(),
            });
        }

        match invocation.tool {
            ExternalTool::Curl => {
                if let Some(target) = arg_after(invocation, "-o") {
                    write(&target, "payload")?;
                }
            }
            ExternalTool::Stdpopsim => {
                if let Some(trees) = arg_after(invocation, "-o") {
                    write(&trees, "trees")?;
                }
            }
            ExternalTool::Tskit => {
                let chrom = invocation
                    .args
                    .last()
                    .and_then(|p| Path::new(p).file_stem().map(|s| s.to_string_lossy().to_string()))
                    .unwrap_or_default();
                if let Some(vcf) = &invocation.stdout_to {
                    write(vcf, &fake_vcf(&chrom))?;
                }
            }
            ExternalTool::Smcpp => {
                if let Some(dir) = arg_after(invocation, "-o") {
                    write(
                        &dir.join("model.final.json"),
                        r#"{"model": {"N0": 10000.0, "knots": [0.0, 0.5, 1.0],
                            "y": [0.0, 0.2, -0.3]}}"#,
                    )?;
                }
            }
            ExternalTool::Msmc => {
                if let Some(prefix) = arg_after(invocation, "-o") {
                    write(
                        &PathBuf::from(format!("{}.final.txt", prefix.display())),
                        "time_index\tleft_time_boundary\tright_time_boundary\tlambda\n\
                         0\t0\t1e-5\t2000\n\
                         1\t1e-5\t2e-5\t1000\n",
                    )?;
                }
            }
            ExternalTool::Bash => run_blueprint_script(invocation)?,
            ExternalTool::Java | ExternalTool::Tar | ExternalTool::Unzip => {}
        }

        Ok(ProcessOutput {
            status_code: Some(0),
            ..Default::default()
        })
    }
}
