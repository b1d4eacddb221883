//! Declaration generator — reflection descriptors to Weft source text
//!
//! Pure text synthesis with no VM access; [`Bridge`](crate::context::Bridge)
//! interprets the results separately. Wrapper bodies route every access
//! through a meta object resolved once in `static init()`, so the generated
//! class needs no per-member foreign methods of its own. Output is
//! deterministic for a given database.
//!
//! Script-visible names are *cleaned* (generic markers rewritten, import
//! namespace prefixes stripped); the strings inside `ref(...)` calls stay
//! raw, because they are database lookup keys.

use weft_reflect::{Callable, Namespace, Param, ReflectionDb, TypeDescriptor};

const T: &str = "    ";

/// Per-namespace accumulator for free-function wrapper text, flushed as a
/// single namespace class declaration.
#[derive(Debug, Clone, Default)]
pub struct NamespaceDecls {
    pub methods: String,
    pub init: String,
}

/// Script-visible spelling of a raw type name: `<` becomes `_`, `>` and
/// `*` vanish, and configured import-namespace prefixes are stripped.
pub fn clean_name(name: &str, import_namespaces: &[String]) -> String {
    let mut result = name.replace('<', "_").replace(['>', '*'], "");
    for ns in import_namespaces {
        result = result.replace(&format!("{ns}::"), "");
    }
    result
}

/// Module a type's declaration compiles into: the namespace name, or
/// `"main"` for the root.
pub fn declaration_module(db: &ReflectionDb, ty: &TypeDescriptor) -> String {
    let ns = db.namespace(ty.namespace);
    if ns.name.is_empty() {
        "main".to_owned()
    } else {
        ns.name.clone()
    }
}

/// Namespace-class key a free function accumulates under: the first path
/// segment after import-namespace stripping, `"Module"` for the root.
pub fn namespace_class_key(ns: &Namespace, import_namespaces: &[String]) -> String {
    let mut segments: &[String] = &ns.path;
    if let Some(first) = segments.first() {
        if import_namespaces.contains(first) {
            segments = &segments[1..];
        }
    }
    match segments.first() {
        Some(first) => first.clone(),
        None => "Module".to_owned(),
    }
}

/// Call-handle signature for `args` underscore parameters: `name(_,_)`.
pub fn call_signature(name: &str, args: usize) -> String {
    let mut sig = String::from(name);
    sig.push('(');
    for i in 0..args {
        if i > 0 {
            sig.push(',');
        }
        sig.push('_');
    }
    sig.push(')');
    sig
}

fn param_list(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// The foreign class declaration for a struct-value or class-object type.
pub fn class_decl(ty: &TypeDescriptor, clean: &str) -> String {
    let raw = &ty.name;

    let mut constructors = String::new();
    let mut members = String::new();
    let mut methods = String::new();
    let mut statics = String::new();
    let mut init = format!("{T}{T}__type = Type.ref(\"{raw}\")\n");

    for (index, ctor) in ty.constructors.iter().enumerate() {
        let params = param_list(&ctor.params);
        let paramsnext = if params.is_empty() {
            String::new()
        } else {
            format!(", {params}")
        };
        init.push_str(&format!(
            "{T}{T}__constructor{index} = Constructor.ref(\"{raw}\", {index})\n"
        ));
        constructors.push_str(&format!(
            "{T}construct new_impl(constructor{index}{paramsnext}) {{}}\n"
        ));
        constructors.push_str(&format!(
            "{T}static new({params}) {{ new_impl(__constructor{index}{paramsnext}) }}\n"
        ));
    }

    for member in &ty.members {
        let n = &member.name;
        init.push_str(&format!("{T}{T}__{n} = Member.ref(\"{raw}\", \"{n}\")\n"));
        members.push_str(&format!("{T}{n} {{ __{n}.get(this) }}\n"));
        if member.is_mutable() {
            members.push_str(&format!("{T}{n}=(value) {{ __{n}.set(this, value) }}\n"));
        }
    }

    for method in &ty.methods {
        let n = &method.name;
        let params = param_list(&method.params);
        let paramsnext = if params.is_empty() {
            String::new()
        } else {
            format!(", {params}")
        };
        init.push_str(&format!("{T}{T}__{n} = Method.ref(\"{raw}\", \"{n}\")\n"));
        methods.push_str(&format!(
            "{T}{n}({params}) {{ __{n}.call(this{paramsnext}) }}\n"
        ));
    }

    // Operator wrappers sit with the methods; the init lines keep their
    // own position so resolution order stays deterministic.
    for op in &ty.operators {
        let n = &op.name;
        init.push_str(&format!("{T}{T}__{n} = Operator.ref(\"{n}\", \"{raw}\")\n"));
        methods.push_str(&format!(
            "{T}{}(other) {{ __{n}.call(this, other) }}\n",
            op.sign
        ));
    }

    for st in &ty.statics {
        let n = &st.name;
        init.push_str(&format!("{T}{T}__{n} = Static.ref(\"{raw}\", \"{n}\")\n"));
        statics.push_str(&format!("{T}static {n} {{ __{n}.get() }}\n"));
        statics.push_str(&format!("{T}static {n}=(value) {{ __{n}.set(value) }}\n"));
    }

    let mut decl = String::new();
    decl.push_str(&format!("foreign class {clean} {{\n"));
    decl.push('\n');
    decl.push_str(&constructors);
    decl.push('\n');
    decl.push_str(&members);
    decl.push('\n');
    decl.push_str(&methods);
    decl.push('\n');
    decl.push_str(&statics);
    decl.push('\n');
    decl.push_str(&format!("{T}static init() {{\n"));
    decl.push_str(&init);
    decl.push_str(&format!("{T}}}\n"));
    decl.push('\n');
    decl.push_str("}\n");
    decl.push('\n');
    decl.push_str(&format!("{clean}.init()\n"));
    decl
}

/// The plain class of named integer constants declared for an enum type.
pub fn enum_decl(ty: &TypeDescriptor, clean: &str) -> String {
    let mut variants = String::new();
    for v in &ty.variants {
        variants.push_str(&format!("{T}static {} {{ {} }}\n", v.name, v.index));
    }
    format!("class {clean} {{\n{variants}}}\n")
}

/// Wrapper and init lines one free function contributes to its namespace
/// class. `namespace_name` is the owning namespace's (raw) name, the first
/// `Function.ref` argument.
pub fn function_wrapper(function: &Callable, namespace_name: &str) -> (String, String) {
    let n = &function.name;
    let params = param_list(&function.params);
    let wrapper = format!("{T}static {n}({params}) {{ __{n}.call({params}) }}\n");
    let init = format!("{T}{T}__{n} = Function.ref(\"{namespace_name}\", \"{n}\")\n");
    (wrapper, init)
}

/// The flushed namespace class: accumulated wrappers plus their `init()`.
pub fn namespace_class_decl(class_name: &str, decls: &NamespaceDecls) -> String {
    let mut decl = String::new();
    decl.push_str(&format!("class {class_name} {{\n"));
    decl.push_str(&decls.methods);
    decl.push('\n');
    decl.push_str(&format!("{T}static init() {{\n"));
    decl.push_str(&decls.init);
    decl.push_str(&format!("{T}}}\n"));
    decl.push_str("}\n");
    decl.push('\n');
    decl.push_str(&format!("{class_name}.init()\n"));
    decl
}

/// Import line interpreted into each non-root namespace module so the
/// generated classes there can see the prelude.
pub fn import_preamble() -> &'static str {
    "import \"main\" for Function, Type, Constructor, Member, Method, Static, Operator, VirtualConstructor\n"
}

/// The prelude: the meta foreign classes, interpreted once into `"main"`.
/// Arities are fixed; the binder registers one trampoline per declared
/// foreign signature.
pub fn prelude_source() -> &'static str {
    concat!(
        "foreign class Function {\n",
        "    construct ref(namespace, name) {}\n",
        "    \n",
        "    foreign call()\n",
        "    foreign call(a0)\n",
        "    foreign call(a0, a1)\n",
        "    foreign call(a0, a1, a2)\n",
        "    foreign call(a0, a1, a2, a3)\n",
        "    foreign call(a0, a1, a2, a3, a4)\n",
        "    foreign call(a0, a1, a2, a3, a4, a5)\n",
        "    foreign call(a0, a1, a2, a3, a4, a5, a6)\n",
        "    foreign call(a0, a1, a2, a3, a4, a5, a6, a7)\n",
        "    foreign call(a0, a1, a2, a3, a4, a5, a6, a7, a8)\n",
        "}\n",
        "\n",
        "foreign class Type {\n",
        "    foreign static new(name)\n",
        "    construct ref(name) {}\n",
        "}\n",
        "\n",
        "foreign class Constructor {\n",
        "    construct ref(class_name, index) {}\n",
        "}\n",
        "\n",
        "foreign class Member {\n",
        "    construct ref(class_name, member_name) {}\n",
        "    \n",
        "    foreign get(object)\n",
        "    foreign set(object, value)\n",
        "}\n",
        "\n",
        "foreign class Static {\n",
        "    construct ref(class_name, member_name) {}\n",
        "    \n",
        "    foreign get()\n",
        "    foreign set(value)\n",
        "}\n",
        "\n",
        "foreign class Method {\n",
        "    construct ref(class_name, method_name) {}\n",
        "    \n",
        "    foreign call(object)\n",
        "    foreign call(object, a0)\n",
        "    foreign call(object, a0, a1)\n",
        "    foreign call(object, a0, a1, a2)\n",
        "    foreign call(object, a0, a1, a2, a3)\n",
        "    foreign call(object, a0, a1, a2, a3, a4)\n",
        "}\n",
        "\n",
        "foreign class Operator {\n",
        "    construct ref(name, class_name) {}\n",
        "    \n",
        "    foreign call(a0, a1)\n",
        "}\n",
        "\n",
        "foreign class VirtualConstructor {\n",
        "    construct ref(class_name) {}\n",
        "    \n",
        "    foreign call()\n",
        "    foreign call(a0)\n",
        "}\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_reflect::{ClassBuilder, DbBuilder, EnumBuilder, FunctionBuilder, TypeKind, Value};

    fn sample_db() -> weft_reflect::ReflectionDb {
        let mut builder = DbBuilder::new();
        let b = builder.builtins().clone();
        builder
            .add_class(
                ClassBuilder::new("Vec2", TypeKind::Struct)
                    .constructor(
                        vec![Param::new("x", b.f32), Param::new("y", b.f32)],
                        |_, _| Value::None,
                    )
                    .member_mut("x", b.f32, |_| Value::None, |_, _| ())
                    .member("id", b.i32, |_| Value::None)
                    .method("length", Vec::new(), Some(b.f32), |_, _| Value::None)
                    .operator(
                        "add",
                        "+",
                        vec![Param::new("a", b.f32), Param::new("b", b.f32)],
                        Some(b.f32),
                        |_, _| Value::None,
                    )
                    .static_value("count", b.i32, Value::Null),
            )
            .unwrap();
        builder
            .add_enum(
                EnumBuilder::new("Axis")
                    .variant("X", 0)
                    .variant("Y", 1)
                    .variant("Z", 2),
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_class_decl_golden() {
        let db = sample_db();
        let ty = db.find_type("Vec2").unwrap();
        let decl = class_decl(ty, "Vec2");
        let expected = "\
foreign class Vec2 {

    construct new_impl(constructor0, x,y) {}
    static new(x,y) { new_impl(__constructor0, x,y) }

    x { __x.get(this) }
    x=(value) { __x.set(this, value) }
    id { __id.get(this) }

    length() { __length.call(this) }
    +(other) { __add.call(this, other) }

    static count { __count.get() }
    static count=(value) { __count.set(value) }

    static init() {
        __type = Type.ref(\"Vec2\")
        __constructor0 = Constructor.ref(\"Vec2\", 0)
        __x = Member.ref(\"Vec2\", \"x\")
        __id = Member.ref(\"Vec2\", \"id\")
        __length = Method.ref(\"Vec2\", \"length\")
        __add = Operator.ref(\"add\", \"Vec2\")
        __count = Static.ref(\"Vec2\", \"count\")
    }

}

Vec2.init()
";
        assert_eq!(decl, expected);
    }

    #[test]
    fn test_class_decl_is_deterministic() {
        let db = sample_db();
        let ty = db.find_type("Vec2").unwrap();
        assert_eq!(class_decl(ty, "Vec2"), class_decl(ty, "Vec2"));
    }

    #[test]
    fn test_immutable_member_has_no_setter() {
        let db = sample_db();
        let ty = db.find_type("Vec2").unwrap();
        let decl = class_decl(ty, "Vec2");
        assert!(decl.contains("x=(value)"));
        assert!(!decl.contains("id=(value)"));
    }

    #[test]
    fn test_zero_arg_constructor() {
        let mut builder = DbBuilder::new();
        builder
            .add_class(
                ClassBuilder::new("Empty", TypeKind::Object)
                    .constructor(Vec::new(), |_, _| Value::None),
            )
            .unwrap();
        let db = builder.build().unwrap();
        let decl = class_decl(db.find_type("Empty").unwrap(), "Empty");
        assert!(decl.contains("    construct new_impl(constructor0) {}\n"));
        assert!(decl.contains("    static new() { new_impl(__constructor0) }\n"));
    }

    #[test]
    fn test_enum_decl_golden() {
        let db = sample_db();
        let ty = db.find_type("Axis").unwrap();
        let expected = "\
class Axis {
    static X { 0 }
    static Y { 1 }
    static Z { 2 }
}
";
        assert_eq!(enum_decl(ty, "Axis"), expected);
    }

    #[test]
    fn test_function_wrapper_lines() {
        let mut builder = DbBuilder::new();
        let b = builder.builtins().clone();
        let math = builder.namespace(&["math"]);
        builder
            .add_function(
                FunctionBuilder::new("clamp", |_, _| Value::None)
                    .namespace(math)
                    .params(vec![Param::new("value", b.f32), Param::new("hi", b.f32)])
                    .result(b.f32),
            )
            .unwrap();
        let db = builder.build().unwrap();
        let f = db.find_function("math", "clamp").unwrap();
        let (wrapper, init) = function_wrapper(f, "math");
        assert_eq!(
            wrapper,
            "    static clamp(value,hi) { __clamp.call(value,hi) }\n"
        );
        assert_eq!(init, "        __clamp = Function.ref(\"math\", \"clamp\")\n");
    }

    #[test]
    fn test_namespace_class_decl_golden() {
        let decls = NamespaceDecls {
            methods: "    static clamp(value,hi) { __clamp.call(value,hi) }\n".to_owned(),
            init: "        __clamp = Function.ref(\"math\", \"clamp\")\n".to_owned(),
        };
        let expected = "\
class math {
    static clamp(value,hi) { __clamp.call(value,hi) }

    static init() {
        __clamp = Function.ref(\"math\", \"clamp\")
    }
}

math.init()
";
        assert_eq!(namespace_class_decl("math", &decls), expected);
    }

    #[test]
    fn test_clean_name() {
        let imports = vec!["engine".to_owned(), "toy".to_owned()];
        assert_eq!(clean_name("Vec2", &imports), "Vec2");
        assert_eq!(clean_name("Vec<float>", &imports), "Vec_float");
        assert_eq!(clean_name("Widget*", &imports), "Widget");
        assert_eq!(clean_name("engine::Colour", &imports), "Colour");
        assert_eq!(clean_name("toy::World*", &imports), "World");
    }

    #[test]
    fn test_namespace_class_key() {
        let imports = vec!["engine".to_owned()];
        let mut builder = DbBuilder::new();
        let math = builder.namespace(&["math"]);
        let nested = builder.namespace(&["engine", "ui"]);
        let shadowed = builder.namespace(&["engine"]);
        let db = builder.build().unwrap();
        assert_eq!(namespace_class_key(db.namespace(0), &imports), "Module");
        assert_eq!(namespace_class_key(db.namespace(math), &imports), "math");
        assert_eq!(namespace_class_key(db.namespace(nested), &imports), "ui");
        assert_eq!(
            namespace_class_key(db.namespace(shadowed), &imports),
            "Module"
        );
    }

    #[test]
    fn test_call_signature_arities() {
        assert_eq!(call_signature("call", 0), "call()");
        assert_eq!(call_signature("call", 1), "call(_)");
        assert_eq!(call_signature("update", 3), "update(_,_,_)");
    }

    #[test]
    fn test_prelude_declares_meta_classes() {
        let prelude = prelude_source();
        for class in [
            "Function",
            "Type",
            "Constructor",
            "Member",
            "Static",
            "Method",
            "Operator",
            "VirtualConstructor",
        ] {
            assert!(
                prelude.contains(&format!("foreign class {class} {{")),
                "prelude is missing {class}"
            );
        }
        // Function.call arities 0 through 9, Method.call receiver plus 0
        // through 5.
        assert_eq!(prelude.matches("foreign call").count(), 10 + 6 + 1 + 2);
        assert!(prelude.contains("foreign static new(name)"));
        assert!(import_preamble().starts_with("import \"main\" for Function"));
    }
}
