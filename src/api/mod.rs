pub mod routes;

pub use routes::{create_router, ingest_var_batch, ApiState, ChartPoint};
