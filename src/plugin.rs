//! Plugins: a named bundle of tools with a declared dependency list.
//!
//! Dependencies are checked against already-*loaded plugin ids*, not tool
//! ids — a plugin can only declare another plugin as a prerequisite, never
//! a bare tool (Open Question resolution, see DESIGN.md).

use std::sync::Arc;

use crate::descriptor::ToolDescriptor;

pub struct Plugin {
    pub id: String,
    pub version: String,
    pub tools: Vec<Arc<ToolDescriptor>>,
    pub dependencies: Vec<String>,
}

impl Plugin {
    pub fn tool_ids(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.id.clone()).collect()
    }
}
