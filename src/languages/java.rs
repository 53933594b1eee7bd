//! Java language support

use anyhow::Result;
use tree_sitter::{Node, Tree};

use crate::languages::LanguageSupport;
use crate::storage::models::{Entity, NodeKind, Relation, RelationKind};

/// Java language support implementation
pub struct JavaLanguage;

impl JavaLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for JavaLanguage {
    fn language_id(&self) -> &'static str {
        "java"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".java"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    fn entry_point_names(&self) -> &[&str] {
        &["main"]
    }

    fn extract(
        &self,
        source: &str,
        tree: &Tree,
        _rel_path: &str,
    ) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let mut extractor = JavaExtractor::new(source);
        extractor.walk(tree.root_node());
        Ok((extractor.entities, extractor.relations))
    }
}

struct JavaExtractor<'a> {
    source: &'a str,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    // Dotted path of enclosing type declarations within the file
    type_scope: Vec<String>,
    current_method: Option<String>,
}

impl<'a> JavaExtractor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            entities: Vec::new(),
            relations: Vec::new(),
            type_scope: Vec::new(),
            current_method: None,
        }
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "package_declaration" => self.extract_package(node),
            "import_declaration" => self.extract_import(node),
            "class_declaration" => self.extract_type(node, NodeKind::Class),
            "interface_declaration" => self.extract_type(node, NodeKind::Interface),
            "method_declaration" | "constructor_declaration" => self.extract_method(node),
            "field_declaration" => self.extract_field(node),
            "method_invocation" => self.extract_invocation(node),
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
            if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
                let dotted = self.text(child);
                let name = dotted.rsplit('.').next().unwrap_or(&dotted).to_string();
                self.entities.push(Entity {
                    kind: NodeKind::Module,
                    name,
                    dotted,
                    parent: None,
                    start_line: line(node, true),
                    end_line: line(node, false),
                });
                break;
            }
        }
    }

    fn extract_import(&mut self, node: Node) {
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
                self.relations.push(Relation {
                    kind: RelationKind::Imports,
                    from: None,
                    target: self.text(child),
                });
                break;
            }
        }
    }

    fn extract_type(&mut self, node: Node, kind: NodeKind) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let dotted = self.qualify(&name);

        self.entities.push(Entity {
            kind,
            name: name.clone(),
            dotted: dotted.clone(),
            parent: self.type_scope.last().cloned(),
            start_line: line(node, true),
            end_line: line(node, false),
        });

        // The superclass/interfaces clauses include their keyword, so
        // names come from the type children rather than the clause text
        if let Some(superclass) = node.child_by_field_name("superclass") {
            self.extract_supertypes(&dotted, superclass, RelationKind::Extends);
        }

        if let Some(interfaces) = node.child_by_field_name("interfaces") {
            self.extract_supertypes(&dotted, interfaces, RelationKind::Implements);
        }

        // `interface A extends B` has no field for its supertype list
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.kind() == "extends_interfaces" {
                    self.extract_supertypes(&dotted, child, RelationKind::Extends);
                }
            }
        }

        self.type_scope.push(dotted);
        if let Some(body) = node.child_by_field_name("body") {
            for i in 0..body.child_count() {
                if let Some(child) = body.child(i) {
                    self.walk(child);
                }
            }
        }
        self.type_scope.pop();
    }

    fn extract_supertypes(&mut self, from: &str, list: Node, kind: RelationKind) {
        let mut stack = vec![list];
        while let Some(node) = stack.pop() {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                match child.kind() {
                    "type_identifier" | "generic_type" | "scoped_type_identifier" => {
                        self.relations.push(Relation {
                            kind,
                            from: Some(from.to_string()),
                            target: type_name(&self.text(child)),
                        });
                    }
                    "type_list" => stack.push(child),
                    _ => {}
                }
            }
        }
    }

    fn extract_method(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let dotted = self.qualify(&name);

        self.entities.push(Entity {
            kind: NodeKind::Method,
            name,
            dotted: dotted.clone(),
            parent: self.type_scope.last().cloned(),
            start_line: line(node, true),
            end_line: line(node, false),
        });

        let old = self.current_method.replace(dotted);
        if let Some(body) = node.child_by_field_name("body") {
            for i in 0..body.child_count() {
                if let Some(child) = body.child(i) {
                    self.walk(child);
                }
            }
        }
        self.current_method = old;
    }

    fn extract_field(&mut self, node: Node) {
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let Some(name_node) = declarator.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        self.entities.push(Entity {
            kind: NodeKind::Field,
            name: name.clone(),
            dotted: self.qualify(&name),
            parent: self.type_scope.last().cloned(),
            start_line: line(node, true),
            end_line: line(node, false),
        });
    }

    fn extract_invocation(&mut self, node: Node) {
        if let Some(name_node) = node.child_by_field_name("name") {
            if let Some(from) = self.caller() {
                self.relations.push(Relation {
                    kind: RelationKind::Calls,
                    from: Some(from),
                    target: self.text(name_node),
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

    fn caller(&self) -> Option<String> {
        self.current_method
            .clone()
            .or_else(|| self.type_scope.last().cloned())
    }

    fn text(&self, node: Node) -> String {
        self.source[node.byte_range()].to_string()
    }

    fn qualify(&self, name: &str) -> String {
        match self.type_scope.last() {
            Some(enclosing) => format!("{enclosing}.{name}"),
            None => name.to_string(),
        }
    }
}

/// Strip generic arguments: `Repository<User>` -> `Repository`.
fn type_name(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

fn line(node: Node, start: bool) -> u32 {
    let pos = if start {
        node.start_position()
    } else {
        node.end_position()
    };
    pos.row as u32 + 1
}
