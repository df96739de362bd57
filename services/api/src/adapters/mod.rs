pub mod db;
pub mod memory;
pub mod ocr_llm;
pub mod tutor_llm;

pub use db::DbAdapter;
pub use memory::MemoryStore;
pub use ocr_llm::OpenAiOcrAdapter;
pub use tutor_llm::OpenAiTutorAdapter;
