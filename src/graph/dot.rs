use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use super::graph_impl::Graph;

impl Graph {
    /// Renders the graph in Graphviz format, one cluster per subgroup.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph lazygraph {\n    rankdir=TB;\n");

        for (index, group) in self.subgroups.iter().enumerate() {
            let _ = writeln!(out, "    subgraph cluster_{} {{", index);
            let _ = writeln!(out, "        label=\"subgroup {}\";", index);
            for member in group.members() {
                let _ = writeln!(out, "        n{};", member.0);
            }
            out.push_str("    }\n");
        }

        for view in self.iter() {
            if view.is_cleared() {
                continue;
            }
            let name = self
                .registry
                .get(view.operation())
                .map(|op| op.name().to_string())
                .unwrap_or_else(|_| format!("{:?}", view.operation()));
            let shape = if view.has_value() { "box" } else { "ellipse" };
            let style = if view.flags().has_external_ref() {
                ", penwidth=2"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "    n{} [label=\"{} {}\\n{}\", shape={}{}];",
                view.id().0,
                view.id(),
                name,
                view.dims(),
                shape,
                style
            );
            for input in view.inputs() {
                let _ = writeln!(out, "    n{} -> n{};", input.0, view.id().0);
            }
        }

        out.push_str("}\n");
        out
    }

    pub fn save_dot(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.to_dot())
    }

    /// One line per referenced node: id, reference count and operation.
    pub fn references_dump(&self) -> String {
        let mut out = String::new();
        for (node, count) in self.references.counts() {
            let name = self
                .operation_of(node)
                .map(|op| op.name().to_string())
                .unwrap_or_else(|_| "<gone>".to_string());
            let _ = writeln!(out, "{} x{} {}", node, count, name);
        }
        out
    }
}
