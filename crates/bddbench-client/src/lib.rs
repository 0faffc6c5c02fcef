//! HTTP side of bddbench: the [`InfluxApi`] transport seam, its reqwest and
//! in-memory implementations, query templates and the operation clients.

pub mod api;
pub mod error;
pub mod flux;
pub mod http;
pub mod mock;
pub mod ops;
pub mod predicate;
pub mod range;

pub use api::{ApiResponse, DeleteRequest, Endpoint, InfluxApi, PointFilter, QueryResponse};
pub use error::{TransportError, TransportResult};
pub use flux::{QueryKind, QuerySpec, ResultSize};
pub use http::HttpInfluxApi;
pub use mock::{MockFailure, MockInfluxApi};
pub use ops::{DeleteClient, ProbeClient, QueryClient, UserClient, WriteClient};
pub use predicate::DeletePredicate;
pub use range::{format_range, parse_range};
