use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "conversionjobkind", rename_all = "snake_case")]
pub(crate) enum ConversionJobKind {
    PdfToQuestions,
    AudioToQuestions,
    AudioTimedTranscript,
}

impl ConversionJobKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ConversionJobKind::PdfToQuestions => "PDF_TO_QUESTIONS",
            ConversionJobKind::AudioToQuestions => "AUDIO_TO_QUESTIONS",
            ConversionJobKind::AudioTimedTranscript => "AUDIO_TIMED_TRANSCRIPT",
        }
    }

    /// Label used in progress messages, e.g. "Processing PDF... (attempt 3/10)".
    pub(crate) fn progress_label(self) -> &'static str {
        match self {
            ConversionJobKind::PdfToQuestions => "Processing PDF",
            ConversionJobKind::AudioToQuestions => "Transcribing audio",
            ConversionJobKind::AudioTimedTranscript => "Transcribing audio with timestamps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "conversiontaskstatus", rename_all = "snake_case")]
pub(crate) enum ConversionTaskStatus {
    Init,
    InProgress,
    Completed,
    Failed,
}

impl ConversionTaskStatus {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, ConversionTaskStatus::Completed | ConversionTaskStatus::Failed)
    }
}

/// What a cached conversion result holds. One external reference can be
/// cached once per kind (plain and detailed transcripts of the same audio).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "conversionresultkind", rename_all = "snake_case")]
pub(crate) enum ConversionResultKind {
    DocumentHtml,
    TranscriptText,
    TranscriptDetailed,
}

impl ConversionResultKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ConversionResultKind::DocumentHtml => "document_html",
            ConversionResultKind::TranscriptText => "transcript_text",
            ConversionResultKind::TranscriptDetailed => "transcript_detailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ConversionJobKind::PdfToQuestions).unwrap();
        assert_eq!(json, "\"PDF_TO_QUESTIONS\"");
        assert_eq!(json.trim_matches('"'), ConversionJobKind::PdfToQuestions.as_str());

        let parsed: ConversionJobKind = serde_json::from_str("\"AUDIO_TO_QUESTIONS\"").unwrap();
        assert_eq!(parsed, ConversionJobKind::AudioToQuestions);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!ConversionTaskStatus::Init.is_terminal());
        assert!(!ConversionTaskStatus::InProgress.is_terminal());
        assert!(ConversionTaskStatus::Completed.is_terminal());
        assert!(ConversionTaskStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&ConversionTaskStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }
}
