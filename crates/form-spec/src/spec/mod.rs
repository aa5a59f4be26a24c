pub mod form;
pub mod item;

pub use form::{FormSpec, ViewSpec};
pub use item::{ChoiceSpec, ItemSpec, ItemType, RuleSpec, ValidationKind, ValidationSpec};
