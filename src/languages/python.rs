//! Python language support

use anyhow::Result;
use tree_sitter::{Node, Tree};

use crate::languages::LanguageSupport;
use crate::storage::models::{Entity, NodeKind, Relation, RelationKind};

/// Python language support implementation
pub struct PythonLanguage;

impl PythonLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageSupport for PythonLanguage {
    fn language_id(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".py"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn entry_point_names(&self) -> &[&str] {
        &["main", "__init__", "__main__"]
    }

    fn extract(
        &self,
        source: &str,
        tree: &Tree,
        rel_path: &str,
    ) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let module = module_name(rel_path);
        let mut extractor = PythonExtractor::new(source, module);
        extractor.extract_module(tree.root_node());
        Ok((extractor.entities, extractor.relations))
    }
}

/// Dotted module name for a project-relative path:
/// `pkg/sub/a.py` -> `pkg.sub.a`, `pkg/__init__.py` -> `pkg`.
fn module_name(rel_path: &str) -> String {
    let trimmed = rel_path.trim_end_matches(".py").replace(['/', '\\'], ".");
    trimmed
        .trim_end_matches(".__init__")
        .trim_end_matches("__init__")
        .trim_end_matches('.')
        .to_string()
}

struct PythonExtractor<'a> {
    source: &'a str,
    module: String,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    // Dotted path of enclosing class/function scopes within the file
    scope: Vec<(NodeKind, String)>,
}

impl<'a> PythonExtractor<'a> {
    fn new(source: &'a str, module: String) -> Self {
        Self {
            source,
            module,
            entities: Vec::new(),
            relations: Vec::new(),
            scope: Vec::new(),
        }
    }

    fn extract_module(&mut self, root: Node) {
        let name = self
            .module
            .rsplit('.')
            .next()
            .unwrap_or(&self.module)
            .to_string();
        self.entities.push(Entity {
            kind: NodeKind::Module,
            name,
            dotted: self.module.clone(),
            parent: None,
            start_line: line(root, true),
            end_line: line(root, false),
        });
        self.walk(root);
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "import_statement" => self.extract_import(node),
            "import_from_statement" => self.extract_import_from(node),
            "class_definition" => self.extract_class(node),
            "function_definition" => self.extract_function(node),
            "decorated_definition" => {
                if let Some(def) = node.child_by_field_name("definition") {
                    self.walk(def);
                }
            }
            "call" => self.extract_call(node),
            _ => {
                for i in 0..node.child_count() {
                    if let Some(child) = node.child(i) {
                        self.walk(child);
                    }
                }
            }
        }
    }

    fn extract_import(&mut self, node: Node) {
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            match child.kind() {
                "dotted_name" => {
                    let target = self.text(child);
                    self.relations.push(Relation {
                        kind: RelationKind::Imports,
                        from: None,
                        target,
                    });
                }
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let target = self.text(name);
                        self.relations.push(Relation {
                            kind: RelationKind::Imports,
                            from: None,
                            target,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn extract_import_from(&mut self, node: Node) {
        if let Some(module) = node.child_by_field_name("module_name") {
            // Relative imports keep only the named part; a bare `from . import x`
            // has no resolvable module path and is skipped.
            let target = self.text(module).trim_start_matches('.').to_string();
            if !target.is_empty() {
                self.relations.push(Relation {
                    kind: RelationKind::Imports,
                    from: None,
                    target,
                });
            }
        }
    }

    fn extract_class(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let dotted = self.qualify(&name);

        self.entities.push(Entity {
            kind: NodeKind::Class,
            name: name.clone(),
            dotted: dotted.clone(),
            parent: self.parent_dotted(),
            start_line: line(node, true),
            end_line: line(node, false),
        });

        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            for i in 0..superclasses.child_count() {
                let Some(child) = superclasses.child(i) else { continue };
                if child.kind() == "identifier" || child.kind() == "attribute" {
                    self.relations.push(Relation {
                        kind: RelationKind::Extends,
                        from: Some(dotted.clone()),
                        target: self.text(child),
                    });
                }
            }
        }

        self.scope.push((NodeKind::Class, dotted));
        if let Some(body) = node.child_by_field_name("body") {
            self.extract_class_body(body);
        }
        self.scope.pop();
    }

    fn extract_class_body(&mut self, body: Node) {
        for i in 0..body.child_count() {
            let Some(child) = body.child(i) else { continue };
            // Class-level assignments become field entities
            if child.kind() == "expression_statement" {
                if let Some(expr) = child.child(0) {
                    if expr.kind() == "assignment" {
                        self.extract_field(expr);
                        continue;
                    }
                }
            }
            self.walk(child);
        }
    }

    fn extract_field(&mut self, assignment: Node) {
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = self.text(left);
        let dotted = self.qualify(&name);
        self.entities.push(Entity {
            kind: NodeKind::Field,
            name,
            dotted,
            parent: self.parent_dotted(),
            start_line: line(assignment, true),
            end_line: line(assignment, false),
        });
    }

    fn extract_function(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let dotted = self.qualify(&name);
        let kind = if matches!(self.scope.last(), Some((NodeKind::Class, _))) {
            NodeKind::Method
        } else {
            NodeKind::Function
        };

        self.entities.push(Entity {
            kind,
            name,
            dotted: dotted.clone(),
            parent: self.parent_dotted(),
            start_line: line(node, true),
            end_line: line(node, false),
        });

        self.scope.push((kind, dotted));
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }
        self.scope.pop();
    }

    fn extract_call(&mut self, node: Node) {
        if let Some(function) = node.child_by_field_name("function") {
            let callee = match function.kind() {
                "identifier" => Some(self.text(function)),
                // obj.method(...) keeps the method name only; receiver
                // types are not resolved (best-effort static calls)
                "attribute" => function
                    .child_by_field_name("attribute")
                    .map(|attr| self.text(attr)),
                _ => None,
            };
            if let Some(target) = callee {
                self.relations.push(Relation {
                    kind: RelationKind::Calls,
                    from: Some(self.caller_dotted()),
                    target,
                });
            }

            // The receiver of obj.method() may itself be a call, as in
            // get_store().run()
            match function.kind() {
                "identifier" => {}
                "attribute" => {
                    if let Some(object) = function.child_by_field_name("object") {
                        self.walk(object);
                    }
                }
                _ => self.walk(function),
            }
        }

        // Nested calls inside arguments
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

    fn qualify(&self, name: &str) -> String {
        match self.scope.last() {
            Some((_, enclosing)) => format!("{enclosing}.{name}"),
            None => name.to_string(),
        }
    }

    fn parent_dotted(&self) -> Option<String> {
        self.scope.last().map(|(_, dotted)| dotted.clone())
    }

    /// Module-level calls are attributed to the module entity.
    fn caller_dotted(&self) -> String {
        match self.scope.last() {
            Some((_, dotted)) => dotted.clone(),
            None => self.module.clone(),
        }
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
        parse_at(source, "pkg/app.py")
    }

    fn parse_at(source: &str, rel_path: &str) -> (Vec<Entity>, Vec<Relation>) {
        let lang = PythonLanguage::new();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&lang.grammar()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        lang.extract(source, &tree, rel_path).unwrap()
    }

    #[test]
    fn module_name_from_path() {
        assert_eq!(module_name("pkg/sub/a.py"), "pkg.sub.a");
        assert_eq!(module_name("a.py"), "a");
        assert_eq!(module_name("pkg/__init__.py"), "pkg");
    }

    #[test]
    fn module_entity_is_always_emitted() {
        let (entities, _) = parse("x = 1\n");
        let module = entities.iter().find(|e| e.kind == NodeKind::Module).unwrap();
        assert_eq!(module.dotted, "pkg.app");
        assert_eq!(module.name, "app");
        assert!(module.parent.is_none());
    }

    #[test]
    fn extracts_top_level_function() {
        let (entities, _) = parse("def foo():\n    pass\n");
        let foo = entities.iter().find(|e| e.name == "foo").unwrap();
        assert_eq!(foo.kind, NodeKind::Function);
        assert_eq!(foo.dotted, "foo");
        assert!(foo.parent.is_none());
        assert_eq!(foo.start_line, 1);
    }

    #[test]
    fn extracts_class_with_methods_and_fields() {
        let source = r#"
class Greeter:
    greeting = "hi"

    def greet(self):
        return self.greeting
"#;
        let (entities, _) = parse(source);

        let class = entities.iter().find(|e| e.kind == NodeKind::Class).unwrap();
        assert_eq!(class.name, "Greeter");

        let method = entities.iter().find(|e| e.kind == NodeKind::Method).unwrap();
        assert_eq!(method.dotted, "Greeter.greet");
        assert_eq!(method.parent.as_deref(), Some("Greeter"));

        let field = entities.iter().find(|e| e.kind == NodeKind::Field).unwrap();
        assert_eq!(field.dotted, "Greeter.greeting");
    }

    #[test]
    fn extracts_inheritance_relation() {
        let (_, relations) = parse("class Dog(Animal):\n    pass\n");
        let extends: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Extends)
            .collect();
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].from.as_deref(), Some("Dog"));
        assert_eq!(extends[0].target, "Animal");
    }

    #[test]
    fn extracts_imports() {
        let source = "import os\nimport json as j\nfrom collections import deque\n";
        let (_, relations) = parse(source);
        let imports: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Imports)
            .map(|r| r.target.as_str())
            .collect();
        assert_eq!(imports, vec!["os", "json", "collections"]);
    }

    #[test]
    fn call_inside_function_names_the_caller() {
        let source = "def foo():\n    bar()\n";
        let (_, relations) = parse(source);
        let calls: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].from.as_deref(), Some("foo"));
        assert_eq!(calls[0].target, "bar");
    }

    #[test]
    fn top_level_call_is_attributed_to_module() {
        let (_, relations) = parse_at("def foo():\n    pass\n\nfoo()\n", "a.py");
        let call = relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .unwrap();
        assert_eq!(call.from.as_deref(), Some("a"));
    }

    #[test]
    fn attribute_call_keeps_method_name() {
        let source = "def run(conn):\n    conn.execute()\n";
        let (_, relations) = parse(source);
        let call = relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .unwrap();
        assert_eq!(call.target, "execute");
    }

    #[test]
    fn chained_call_records_receiver_and_method() {
        let source = "def top():\n    get_store().run()\n";
        let (_, relations) = parse(source);
        let calls: Vec<(&str, &str)> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .map(|r| (r.from.as_deref().unwrap_or(""), r.target.as_str()))
            .collect();
        assert!(calls.contains(&("top", "run")));
        assert!(calls.contains(&("top", "get_store")));
    }

    #[test]
    fn nested_calls_in_arguments_are_found() {
        let source = "def run():\n    outer(inner())\n";
        let (_, relations) = parse(source);
        let targets: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .map(|r| r.target.as_str())
            .collect();
        assert!(targets.contains(&"outer"));
        assert!(targets.contains(&"inner"));
    }

    #[test]
    fn decorated_function_is_extracted() {
        let source = "@app.route('/x')\ndef handler():\n    pass\n";
        let (entities, _) = parse(source);
        assert!(entities
            .iter()
            .any(|e| e.kind == NodeKind::Function && e.name == "handler"));
    }

    #[test]
    fn recursive_call_is_recorded() {
        let source = "def fact(n):\n    return fact(n - 1)\n";
        let (_, relations) = parse(source);
        let call = relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .unwrap();
        assert_eq!(call.from.as_deref(), Some("fact"));
        assert_eq!(call.target, "fact");
    }
}
