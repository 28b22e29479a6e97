//! Agent Pipeline: the ordered sequence of analysis stages for one user.
//!
//! Stage results accumulate under `aiInsights.partials.<stage>` in the user
//! document; the finalize run consumes them and produces one consolidated
//! report under `finalAnalysis`.

pub mod agents;
pub mod context;
pub mod cross_exam;
pub mod handlers;
pub mod prompts;
pub mod report;
pub mod sequencer;

use crate::llm::Provider;

/// The analysis stages, in dependency order. SocioEconomic and
/// LearningRoadmap are independent and may run concurrently; GapAnalysis
/// consumes SocioEconomic + Resume + Aptitude + CrossExam; FinalReport
/// consumes GapAnalysis + Recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SocioEconomic,
    LearningRoadmap,
    ResumeAnalysis,
    AptitudeInterest,
    CrossExam,
    GapAnalysis,
    Recommendation,
    FinalReport,
}

impl Stage {
    /// The partial key under `aiInsights.partials` (camelCase wire name).
    pub fn partial_key(&self) -> &'static str {
        match self {
            Stage::SocioEconomic => "socioEconomic",
            Stage::LearningRoadmap => "learning",
            Stage::ResumeAnalysis => "resume",
            Stage::AptitudeInterest => "aptitude",
            Stage::CrossExam => "crossExam",
            Stage::GapAnalysis => "gapAnalysis",
            Stage::Recommendation => "recommendation",
            Stage::FinalReport => "finalReport",
        }
    }

    /// Default provider per stage. Only the Recommendation stage goes to
    /// OpenAI; everything else defaults to Groq.
    pub fn default_provider(&self) -> Provider {
        match self {
            Stage::Recommendation => Provider::OpenAi,
            _ => Provider::Groq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_keys_match_document_wire_names() {
        assert_eq!(Stage::SocioEconomic.partial_key(), "socioEconomic");
        assert_eq!(Stage::LearningRoadmap.partial_key(), "learning");
        assert_eq!(Stage::ResumeAnalysis.partial_key(), "resume");
        assert_eq!(Stage::AptitudeInterest.partial_key(), "aptitude");
        assert_eq!(Stage::CrossExam.partial_key(), "crossExam");
    }

    #[test]
    fn test_only_recommendation_defaults_to_openai() {
        assert_eq!(Stage::Recommendation.default_provider(), Provider::OpenAi);
        assert_eq!(Stage::GapAnalysis.default_provider(), Provider::Groq);
        assert_eq!(Stage::SocioEconomic.default_provider(), Provider::Groq);
    }
}
