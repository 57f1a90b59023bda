pub mod classifier;
pub mod directory;
pub mod submission;

pub use classifier::{
    Classification, ClassificationGateway, Classifier, Intent, KeywordClassifier, OllamaClassifier,
    RawClassification,
};
pub use directory::{Directory, DirectoryRecord, StaticDirectory};
pub use submission::{NcExgratiaClient, SubmissionError, SubmissionGateway, SubmissionReceipt, Submitter};
