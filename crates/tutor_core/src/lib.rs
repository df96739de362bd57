pub mod domain;
pub mod ports;
pub mod prompt;

pub use domain::{
    Bookmark, BookmarkDraft, Chat, ChatMessage, FileAttachment, HistoryEntry, MessageDraft,
    Sender, StructuredFileContent, Upload, UploadDraft,
};
pub use ports::{ChatStore, OcrMode, OcrService, PortError, PortResult, TutorService};
