#![allow(missing_docs)]

pub mod compiled;
pub mod deps;
pub mod engine;
pub mod error;
pub mod expr;
pub mod navigation;
pub mod render;
pub mod session;
pub mod spec;
pub mod state;
pub mod submission;
pub mod validate;

pub use compiled::{CompiledForm, CompiledItem, CompiledView};
pub use deps::{Dependent, DependencyIndex, RuleSlot};
pub use engine::{Engine, PassReport, Trigger};
pub use error::{DefinitionError, DependencyCycleError};
pub use expr::{Context, Evaluator, ExprError, Expression, Limits};
pub use navigation::{
    FieldError, HostAction, HostError, HostRequest, HostResponse, HostTransport, NavRequest,
    NavState, NavigationController, NavigationError, PendingNavigation, Ticket, navigate,
};
pub use render::{
    MenuEntry, RenderItem, RenderPayload, RenderProgress, RenderStatus, build_render_payload,
    render_json_ui, render_text,
};
pub use session::{Session, SessionContext, SharedSession, Update};
pub use spec::{
    ChoiceSpec, FormSpec, ItemSpec, ItemType, RuleSpec, ValidationKind, ValidationSpec, ViewSpec,
};
pub use state::{ErrorMap, FormState, ResolvedChoice, Store};
pub use submission::{assemble, assemble_in_views, serialize_answer};
pub use validate::{Scope, apply_errors, validate_items};
