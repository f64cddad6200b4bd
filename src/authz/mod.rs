//! The Authorization Engine (§4.4) and the data it reasons over (§4.3):
//! [`model`] holds tuples and authorization models, [`tuple_store`] is the
//! storage interface (concrete backends in [`crate::storage`]), and
//! [`engine`] combines both with the sandbox to answer `checkPermission`.

pub mod engine;
pub mod model;
pub mod tuple_store;

pub use engine::{
    AuditSink, AuthorizationEngine, InMemoryAuditLog, NoAdmins, NullAuditSink, ResolvedPermissions,
    UserDirectory,
};
pub use model::{AuthorizationModel, PermissionDef, PolicyAudit, PolicySource, RelationDef, Tuple};
pub use tuple_store::{StoreError, Subject, TupleStore};
