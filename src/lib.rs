pub mod ast;
pub mod btree;
pub mod codec;
pub mod column;
pub mod config;
pub mod data_type;
pub mod database;
pub mod error;
pub mod eval;
pub mod parser;
pub mod storage;
pub mod table;
pub mod tokenizer;
pub mod value;

pub use btree::BTree;
pub use column::Column;
pub use config::StorageConfig;
pub use data_type::DataType;
pub use database::{Database, Outcome};
pub use error::{Error, Result, SchemaError, SyntaxError};
pub use storage::{Comparison, IndexHint, Predicate, ScanPlan, Storage};
pub use table::{Row, TableSchema};
pub use value::Value;
