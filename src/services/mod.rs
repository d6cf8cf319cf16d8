pub mod database;
pub mod db_loader;
pub mod ddl;
pub mod inference;
pub mod mock;
pub mod names;
pub mod profiler;
pub mod provisioner;

pub use database::Database;
pub use db_loader::DbLoader;
pub use inference::SchemaInferrer;
pub use mock::RecordingDatabase;
pub use profiler::ColumnProfiler;
pub use provisioner::Provisioner;
