//! Go language support

use anyhow::Result;
use tree_sitter::{Node, Tree};

use crate::languages::LanguageSupport;
use crate::storage::models::{Entity, NodeKind, Relation, RelationKind};

/// Go language support implementation
pub struct GoLanguage;

impl GoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for GoLanguage {
    fn language_id(&self) -> &'static str {
        "go"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".go"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn entry_point_names(&self) -> &[&str] {
        &["main", "init"]
    }

    fn extract(
        &self,
        source: &str,
        tree: &Tree,
        _rel_path: &str,
    ) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let mut extractor = GoExtractor::new(source);
        extractor.walk(tree.root_node());
        Ok((extractor.entities, extractor.relations))
    }
}

struct GoExtractor<'a> {
    source: &'a str,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    current_func: Option<String>,
    package: Option<String>,
}

impl<'a> GoExtractor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            entities: Vec::new(),
            relations: Vec::new(),
            current_func: None,
            package: None,
        }
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "package_clause" => self.extract_package(node),
            "import_declaration" => self.extract_imports(node),
            "function_declaration" => self.extract_function(node),
            "method_declaration" => self.extract_method(node),
            "type_declaration" => self.extract_types(node),
            "call_expression" => self.extract_call(node),
            _ => {
                for i in 0..node.child_count() {
                    if let Some(child) = node.child(i) {
                        self.walk(child);
                    }
                }
            }
        }
    }

    fn extract_package(&mut self, node: Node) {
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            if child.kind() == "package_identifier" {
                let name = self.text(child);
                self.package = Some(name.clone());
                self.entities.push(Entity {
                    kind: NodeKind::Module,
                    name: name.clone(),
                    dotted: name,
                    parent: None,
                    start_line: line(node, true),
                    end_line: line(node, false),
                });
                break;
            }
        }
    }

    fn extract_imports(&mut self, node: Node) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            for i in 0..n.child_count() {
                let Some(child) = n.child(i) else { continue };
                match child.kind() {
                    "import_spec" => {
                        if let Some(path) = child.child_by_field_name("path") {
                            let target = self.text(path).trim_matches('"').to_string();
                            if !target.is_empty() {
                                self.relations.push(Relation {
                                    kind: RelationKind::Imports,
                                    from: None,
                                    target,
                                });
                            }
                        }
                    }
                    "import_spec_list" => stack.push(child),
                    _ => {}
                }
            }
        }
    }

    fn extract_function(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);

        self.entities.push(Entity {
            kind: NodeKind::Function,
            name: name.clone(),
            dotted: name.clone(),
            parent: None,
            start_line: line(node, true),
            end_line: line(node, false),
        });

        self.walk_body(node, name);
    }

    fn extract_method(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let receiver = node
            .child_by_field_name("receiver")
            .and_then(|r| self.receiver_type(r));

        let dotted = match &receiver {
            Some(ty) => format!("{ty}.{name}"),
            None => name.clone(),
        };

        self.entities.push(Entity {
            kind: NodeKind::Method,
            name,
            dotted: dotted.clone(),
            parent: receiver,
            start_line: line(node, true),
            end_line: line(node, false),
        });

        self.walk_body(node, dotted);
    }

    fn walk_body(&mut self, node: Node, dotted: String) {
        let old = self.current_func.replace(dotted);
        if let Some(body) = node.child_by_field_name("body") {
            for i in 0..body.child_count() {
                if let Some(child) = body.child(i) {
                    self.walk(child);
                }
            }
        }
        self.current_func = old;
    }

    /// Receiver type name, unwrapping pointers: `(s *Server)` -> `Server`.
    fn receiver_type(&self, receiver: Node) -> Option<String> {
        for i in 0..receiver.child_count() {
            let child = receiver.child(i)?;
            if child.kind() == "parameter_declaration" {
                let ty = child.child_by_field_name("type")?;
                let ident = match ty.kind() {
                    "pointer_type" => ty
                        .named_child(0)
                        .filter(|c| c.kind() == "type_identifier")?,
                    "type_identifier" => ty,
                    _ => return None,
                };
                return Some(self.text(ident));
            }
        }
        None
    }

    fn extract_types(&mut self, node: Node) {
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            if child.kind() != "type_spec" {
                continue;
            }
            let Some(name_node) = child.child_by_field_name("name") else {
                continue;
            };
            let kind = match child.child_by_field_name("type").map(|t| t.kind()) {
                Some("interface_type") => NodeKind::Interface,
                _ => NodeKind::Struct,
            };
            let name = self.text(name_node);
            self.entities.push(Entity {
                kind,
                name: name.clone(),
                dotted: name,
                parent: None,
                start_line: line(child, true),
                end_line: line(child, false),
            });
        }
    }

    fn extract_call(&mut self, node: Node) {
        if let Some(function) = node.child_by_field_name("function") {
            let callee = match function.kind() {
                "identifier" => Some(self.text(function)),
                "selector_expression" => function
                    .child_by_field_name("field")
                    .map(|f| self.text(f)),
                _ => None,
            };
            // Calls in package-level initializers attribute to the package
            let from = self.current_func.clone().or_else(|| self.package.clone());
            if let (Some(target), Some(from)) = (callee, from) {
                self.relations.push(Relation {
                    kind: RelationKind::Calls,
                    from: Some(from),
                    target,
                });
            }
        }

        if let Some(args) = node.child_by_field_name("arguments") {
            for i in 0..args.child_count() {
                if let Some(child) = args.child(i) {
                    self.walk(child);
                }
            }
        }
    }

    fn text(&self, node: Node) -> String {
        self.source[node.byte_range()].to_string()
    }
}

fn line(node: Node, start: bool) -> u32 {
    let pos = if start {
        node.start_position()
    } else {
        node.end_position()
    };
    pos.row as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (Vec<Entity>, Vec<Relation>) {
        let lang = GoLanguage::new();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&lang.grammar()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        lang.extract(source, &tree, "srv/main.go").unwrap()
    }

    #[test]
    fn extracts_package_as_module() {
        let (entities, _) = parse("package util\n");
        let module = entities.iter().find(|e| e.kind == NodeKind::Module).unwrap();
        assert_eq!(module.name, "util");
        assert_eq!(module.dotted, "util");
    }

    #[test]
    fn extracts_single_and_grouped_imports() {
        let source = r#"
package main

import "fmt"

import (
    "os"
    "strings"
)
"#;
        let (_, relations) = parse(source);
        let mut imports: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Imports)
            .map(|r| r.target.as_str())
            .collect();
        imports.sort_unstable();
        assert_eq!(imports, vec!["fmt", "os", "strings"]);
    }

    #[test]
    fn extracts_function_and_calls() {
        let source = r#"
package main

func main() {
    run()
    fmt.Println("hi")
}
"#;
        let (entities, relations) = parse(source);
        let main = entities
            .iter()
            .find(|e| e.kind == NodeKind::Function)
            .unwrap();
        assert_eq!(main.name, "main");

        let calls: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.from.as_deref() == Some("main")));
        assert!(calls.iter().any(|c| c.target == "run"));
        assert!(calls.iter().any(|c| c.target == "Println"));
    }

    #[test]
    fn method_receiver_becomes_parent() {
        let source = r#"
package srv

type Server struct {
    addr string
}

func (s *Server) Start() {
    s.listen()
}
"#;
        let (entities, relations) = parse(source);

        let server = entities.iter().find(|e| e.kind == NodeKind::Struct).unwrap();
        assert_eq!(server.name, "Server");

        let start = entities.iter().find(|e| e.kind == NodeKind::Method).unwrap();
        assert_eq!(start.dotted, "Server.Start");
        assert_eq!(start.parent.as_deref(), Some("Server"));

        let call = relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .unwrap();
        assert_eq!(call.from.as_deref(), Some("Server.Start"));
        assert_eq!(call.target, "listen");
    }

    #[test]
    fn interface_type_is_classified() {
        let source = "package x\n\ntype Runner interface {\n    Run()\n}\n";
        let (entities, _) = parse(source);
        let runner = entities
            .iter()
            .find(|e| e.kind == NodeKind::Interface)
            .unwrap();
        assert_eq!(runner.name, "Runner");
    }

    #[test]
    fn value_receiver_is_unwrapped() {
        let source = "package x\n\ntype Point struct{}\n\nfunc (p Point) Norm() {}\n";
        let (entities, _) = parse(source);
        let norm = entities.iter().find(|e| e.kind == NodeKind::Method).unwrap();
        assert_eq!(norm.dotted, "Point.Norm");
    }

    #[test]
    fn package_level_call_attributes_to_the_package() {
        let source = "package store\n\nvar defaultStore = Open(\"graph.db\")\n";
        let (_, relations) = parse(source);
        let call = relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .unwrap();
        assert_eq!(call.from.as_deref(), Some("store"));
        assert_eq!(call.target, "Open");
    }

    #[test]
    fn nested_call_arguments_are_walked() {
        let source = "package x\n\nfunc run() {\n    outer(inner())\n}\n";
        let (_, relations) = parse(source);
        let targets: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .map(|r| r.target.as_str())
            .collect();
        assert!(targets.contains(&"outer"));
        assert!(targets.contains(&"inner"));
    }
}
