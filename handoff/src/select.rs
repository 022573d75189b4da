//! Selection of the next pending step, for `handoff next` and the driver.
//!
//! Position is recomputed from artifact presence every time; nothing about
//! progress is kept in memory between attempts.

use std::path::Path;

use anyhow::Result;

use crate::errors::ConfigError;
use crate::io::run_dir::RunPaths;
use crate::io::run_log::declared_sequence;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Every step has an output artifact.
    Complete { total: usize },
    /// First step without an output artifact (1-based).
    Pending {
        index: usize,
        role: String,
        total: usize,
    },
}

/// First step of `sequence` lacking both output and raw response.
pub fn find_next_step(paths: &RunPaths, sequence: &[String]) -> SelectOutcome {
    sequence
        .iter()
        .enumerate()
        .map(|(idx, role)| (idx + 1, role))
        .find(|(index, role)| !paths.step_files(*index, role).has_output())
        .map_or(
            SelectOutcome::Complete {
                total: sequence.len(),
            },
            |(index, role)| SelectOutcome::Pending {
                index,
                role: role.clone(),
                total: sequence.len(),
            },
        )
}

/// Select from a run directory using the sequence declared in its run log,
/// or `fallback` when the log declares none.
pub fn select_from_run_dir(dir: &Path, fallback: Option<&[String]>) -> Result<SelectOutcome> {
    let paths = RunPaths::new(dir);
    let sequence = match declared_sequence(&paths.run_log)? {
        Some(sequence) => sequence,
        None => match fallback {
            Some(sequence) if !sequence.is_empty() => sequence.to_vec(),
            _ => {
                return Err(anyhow::Error::new(ConfigError::new(format!(
                    "sequence not found in {}; run the dispatcher first or provide --sequence",
                    paths.run_log.display()
                ))));
            }
        },
    };
    Ok(find_next_step(&paths, &sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::run_dir::write_text;

    fn seq(roles: &[&str]) -> Vec<String> {
        roles.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn first_step_without_artifacts_is_pending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path());
        let sequence = seq(&["orchestrator", "designer", "implementer"]);
        assert_eq!(
            find_next_step(&paths, &sequence),
            SelectOutcome::Pending {
                index: 1,
                role: "orchestrator".to_string(),
                total: 3
            }
        );

        write_text(&paths.step_files(1, "orchestrator").output, "plan").expect("write");
        write_text(&paths.step_files(2, "designer").response, "design").expect("write");
        assert_eq!(
            find_next_step(&paths, &sequence),
            SelectOutcome::Pending {
                index: 3,
                role: "implementer".to_string(),
                total: 3
            }
        );

        write_text(&paths.step_files(3, "implementer").output, "code").expect("write");
        assert_eq!(
            find_next_step(&paths, &sequence),
            SelectOutcome::Complete { total: 3 }
        );
    }

    #[test]
    fn run_dir_without_sequence_needs_fallback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = select_from_run_dir(temp.path(), None).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());

        let fallback = seq(&["orchestrator"]);
        assert_eq!(
            select_from_run_dir(temp.path(), Some(&fallback)).expect("select"),
            SelectOutcome::Pending {
                index: 1,
                role: "orchestrator".to_string(),
                total: 1
            }
        );
    }
}
