//! 配置阶段的错误类型，每种错误带一个稳定的key，方便上层做提示

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExamError {
    #[error("incorrect exam dimensions: {0}")]
    BadDimensions(String),

    #[error("all the answer tables must have the same number of choices")]
    SameNumChoices,

    #[error("unknown image transformation: {0}")]
    InvalidTransformation(i32),

    #[error("bad model: {0}")]
    BadModel(String),

    #[error("cannot load classifier model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("missing classifier: {0}")]
    MissingClassifier(&'static str),

    #[error("bad detection options: {0}")]
    BadOptions(String),

    #[error("cannot load image {path}: {reason}")]
    LoadImage { path: String, reason: String },

    #[error("question {question} out of range (exam has {num_questions} questions)")]
    BadAnswer { question: usize, num_questions: usize },
}

impl ExamError {
    /// 错误的稳定标识
    pub fn key(&self) -> &'static str {
        match self {
            ExamError::BadDimensions(_) => "bad_dimensions",
            ExamError::SameNumChoices => "same_num_choices",
            ExamError::InvalidTransformation(_) => "invalid_transformation",
            ExamError::BadModel(_) => "bad_model",
            ExamError::ModelLoad { .. } => "model_load",
            ExamError::MissingClassifier(_) => "missing_classifier",
            ExamError::BadOptions(_) => "bad_options",
            ExamError::LoadImage { .. } => "load_image",
            ExamError::BadAnswer { .. } => "bad_answer",
        }
    }
}
