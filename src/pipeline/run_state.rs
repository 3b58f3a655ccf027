use crate::common::error::{EtlError, Result};
use serde::{Deserialize, Serialize};

/// Per-run progress through the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Extracted,
    Cleaned,
    Transformed,
    /// Either or both loaders finished; both must be done before analytics
    Loading { relational: bool, document: bool },
    Analyzed,
    Reported,
    Failed,
}

/// Stage completions that advance the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    Extracted,
    Cleaned,
    Transformed,
    RelationalLoaded,
    DocumentLoaded,
    Analyzed,
    Reported,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Reported | RunState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Pending => "PENDING",
            RunState::Extracted => "EXTRACTED",
            RunState::Cleaned => "CLEANED",
            RunState::Transformed => "TRANSFORMED",
            RunState::Loading {
                relational: true,
                document: true,
            } => "LOADED",
            RunState::Loading { relational: true, .. } => "LOADED_RELATIONAL",
            RunState::Loading { document: true, .. } => "LOADED_DOCUMENT",
            RunState::Loading { .. } => "LOADING",
            RunState::Analyzed => "ANALYZED",
            RunState::Reported => "REPORTED",
            RunState::Failed => "FAILED",
        }
    }

    /// Next state for `event`, or an error when the transition is illegal
    pub fn apply(self, event: StageEvent) -> Result<RunState> {
        use RunState as S;
        use StageEvent as E;

        let next = match (self, event) {
            (S::Reported, _) | (S::Failed, _) => None,
            (_, E::Failed) => Some(S::Failed),
            (S::Pending, E::Extracted) => Some(S::Extracted),
            (S::Extracted, E::Cleaned) => Some(S::Cleaned),
            (S::Cleaned, E::Transformed) => Some(S::Transformed),
            (S::Transformed, E::RelationalLoaded) => Some(S::Loading {
                relational: true,
                document: false,
            }),
            (S::Transformed, E::DocumentLoaded) => Some(S::Loading {
                relational: false,
                document: true,
            }),
            (S::Loading { relational: false, document }, E::RelationalLoaded) => Some(S::Loading {
                relational: true,
                document,
            }),
            (S::Loading { relational, document: false }, E::DocumentLoaded) => Some(S::Loading {
                relational,
                document: true,
            }),
            (
                S::Loading {
                    relational: true,
                    document: true,
                },
                E::Analyzed,
            ) => Some(S::Analyzed),
            (S::Analyzed, E::Reported) => Some(S::Reported),
            _ => None,
        };
        next.ok_or_else(|| {
            EtlError::StateTransition(format!("{} cannot accept {:?}", self.label(), event))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_accepts_loaders_in_either_order() {
        for loaders in [
            [StageEvent::RelationalLoaded, StageEvent::DocumentLoaded],
            [StageEvent::DocumentLoaded, StageEvent::RelationalLoaded],
        ] {
            let mut state = RunState::Pending;
            for event in [StageEvent::Extracted, StageEvent::Cleaned, StageEvent::Transformed]
                .into_iter()
                .chain(loaders)
                .chain([StageEvent::Analyzed, StageEvent::Reported])
            {
                state = state.apply(event).unwrap();
            }
            assert_eq!(state, RunState::Reported);
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn illegal_transitions_are_errors() {
        assert!(RunState::Pending.apply(StageEvent::Cleaned).is_err());
        let half = RunState::Transformed.apply(StageEvent::RelationalLoaded).unwrap();
        assert_eq!(half.label(), "LOADED_RELATIONAL");
        assert!(half.apply(StageEvent::Analyzed).is_err());
        assert!(half.apply(StageEvent::RelationalLoaded).is_err());
        assert!(RunState::Reported.apply(StageEvent::Failed).is_err());
        assert!(RunState::Failed.apply(StageEvent::Extracted).is_err());
    }

    #[test]
    fn failure_is_reachable_from_any_live_state() {
        assert_eq!(RunState::Cleaned.apply(StageEvent::Failed).unwrap(), RunState::Failed);
        assert_eq!(
            RunState::Loading {
                relational: true,
                document: false
            }
            .apply(StageEvent::Failed)
            .unwrap(),
            RunState::Failed
        );
    }
}
