/*!

The attribute store: which nodes exist, whether they are still in the population, and the
value of every declared attribute for each of them.

Node ids are allocated monotonically and never reused. A departed node keeps its slot, and its
attribute values, but is no longer active: every accessor in `ContextPopulationExt` treats it as
gone and fails with `AttributeError::InactiveNode`.

*/

mod context_ext;
mod data;
mod init_list;
mod query;

// `ContextPopulationExt` is the public API to `PopulationData`.
pub use data::PopulationData;
pub use init_list::InitializationList;
pub use query::Query;

pub use context_ext::ContextPopulationExt;
