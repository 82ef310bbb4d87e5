pub mod cache;
pub mod matcher;
pub mod render;

pub use cache::{ContentCache, TableContent};
pub use matcher::{format_literal, is_informative, match_values, rank_literals, similarity, ValueMatch};
pub use render::{
    describe_columns, render_complete, render_details, render_primary_key, render_reduced,
    ColumnDesc,
};
