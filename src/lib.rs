pub mod acquisition;
pub mod code_table;
pub mod compute;
pub mod constants;
pub mod gold_code;
pub mod intake;
pub mod perf;
pub mod types;
pub mod util;
