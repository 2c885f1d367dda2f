mod parameter;
mod parameter_store;
mod sync_session;

pub use parameter::{PARAM_ID_LEN, Parameter, normalize_name};
pub use parameter_store::{ParameterStore, SyncEvent, SyncOutcome, SyncProgress};
pub use sync_session::ParameterSyncSession;
