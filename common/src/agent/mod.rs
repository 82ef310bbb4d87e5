pub mod decomposer;
pub mod generator;
pub mod linker;
pub mod parser;
pub mod prompt;
pub mod refiner;

pub use decomposer::Decomposer;
pub use generator::Generator;
pub use linker::SchemaLinker;
pub use parser::{extract_sql, extract_sub_questions, parse_selection};
pub use refiner::{check_result, normalize_sql, ExecutionRecord, Refiner, Verdict};
