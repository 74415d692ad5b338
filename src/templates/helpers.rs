//! Pure helper functions exposed to templates.
//!
//! Every helper is a plain Rust function so generators and fallbacks share
//! the exact naming rules the templates use.

use minijinja::{Environment, Error, ErrorKind, Value};
use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound for `times(n)`; keeps a bad context from producing huge output.
pub const MAX_REPEAT: u32 = 1000;

static SEPARATED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[-_\s]+(.)?").ok());
static HUMP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").ok());
static SPACING: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[\s_]+").ok());

fn join_separated(s: &str) -> String {
    match SEPARATED.as_ref() {
        Some(re) => re
            .replace_all(s, |caps: &regex::Captures<'_>| {
                caps.get(1)
                    .map(|m| m.as_str().to_uppercase())
                    .unwrap_or_default()
            })
            .into_owned(),
        None => s.replace(['-', '_', ' '], ""),
    }
}

fn with_first(s: &str, upper: bool) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if upper => first.to_uppercase().collect::<String>() + chars.as_str(),
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// `StockMovement` → `stockMovement`, `sales-orders` → `salesOrders`.
pub fn camel_case(s: &str) -> String {
    with_first(&join_separated(s.trim()), false)
}

/// `stock_movement` → `StockMovement`.
pub fn pascal_case(s: &str) -> String {
    with_first(&join_separated(s.trim()), true)
}

/// `StockMovement` → `stock-movement`, `Sales Orders` → `sales-orders`.
pub fn kebab_case(s: &str) -> String {
    let s = s.trim();
    let humped = match HUMP.as_ref() {
        Some(re) => re.replace_all(s, "$1-$2").into_owned(),
        None => s.to_string(),
    };
    let spaced = match SPACING.as_ref() {
        Some(re) => re.replace_all(&humped, "-").into_owned(),
        None => humped.replace([' ', '_'], "-"),
    };
    spaced.to_lowercase()
}

/// English-ish plural used for collection paths.
pub fn pluralize(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if s.ends_with('s') || s.ends_with('x') || s.ends_with("ch") || s.ends_with("sh") {
        return format!("{s}es");
    }
    if let Some(stem) = s.strip_suffix('y') {
        let vowel_before = stem
            .chars()
            .last()
            .is_some_and(|c| "aeiouAEIOU".contains(c));
        if !vowel_before {
            return format!("{stem}ies");
        }
    }
    format!("{s}s")
}

/// Mongoose schema type expression for a field type name.
pub fn mongoose_type(type_name: &str) -> String {
    match type_name {
        "String" | "Enum" => "String",
        "Number" => "Number",
        "Boolean" => "Boolean",
        "Date" => "Date",
        "Reference" => "mongoose.Schema.Types.ObjectId",
        "Array" => "[mongoose.Schema.Types.Mixed]",
        _ => "mongoose.Schema.Types.Mixed",
    }
    .to_string()
}

/// Sequelize `DataTypes` expression for a field type name.
pub fn sequelize_type(type_name: &str, values: &[String]) -> String {
    match type_name {
        "String" => "DataTypes.STRING".to_string(),
        "Number" => "DataTypes.FLOAT".to_string(),
        "Boolean" => "DataTypes.BOOLEAN".to_string(),
        "Date" => "DataTypes.DATE".to_string(),
        "Reference" => "DataTypes.INTEGER".to_string(),
        "Array" => "DataTypes.JSON".to_string(),
        "Enum" => {
            let quoted: Vec<String> = values.iter().map(|v| js_string(v)).collect();
            format!("DataTypes.ENUM({})", quoted.join(", "))
        }
        _ => "DataTypes.JSON".to_string(),
    }
}

/// Single-quoted JS string literal.
pub fn js_string(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n");
    format!("'{escaped}'")
}

/// Bounded `0..n` sequence for repetition in templates.
pub fn times(n: u32) -> Vec<u32> {
    (0..n.min(MAX_REPEAT)).collect()
}

fn json_filter(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("json: {e}")))
}

fn includes_test(haystack: Value, needle: Value) -> bool {
    if let (Some(h), Some(n)) = (haystack.as_str(), needle.as_str()) {
        return h.contains(n);
    }
    match haystack.try_iter() {
        Ok(mut iter) => iter.any(|item| item == needle),
        Err(_) => false,
    }
}

/// Register every helper on an environment.
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("camel_case", |s: String| camel_case(&s));
    env.add_filter("pascal_case", |s: String| pascal_case(&s));
    env.add_filter("kebab_case", |s: String| kebab_case(&s));
    env.add_filter("pluralize", |s: String| pluralize(&s));
    env.add_filter("mongoose_type", |s: String| mongoose_type(&s));
    env.add_filter("sequelize_type", |s: String, values: Option<Vec<String>>| {
        sequelize_type(&s, &values.unwrap_or_default())
    });
    env.add_filter("js_string", |s: String| js_string(&s));
    env.add_filter("json", json_filter);
    env.add_test("includes", includes_test);
    env.add_function("times", times);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_conversion() {
        assert_eq!(camel_case("StockMovement"), "stockMovement");
        assert_eq!(camel_case("sales-orders"), "salesOrders");
        assert_eq!(camel_case("supply_chain"), "supplyChain");
        assert_eq!(pascal_case("inventory"), "Inventory");
        assert_eq!(pascal_case("human resources"), "HumanResources");
        assert_eq!(kebab_case("StockMovement"), "stock-movement");
        assert_eq!(kebab_case("Sales Orders"), "sales-orders");
        assert_eq!(kebab_case("hr"), "hr");
        assert_eq!(camel_case(""), "");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Product"), "Products");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("Delivery"), "Deliveries");
        assert_eq!(pluralize("Address"), "Addresses");
        assert_eq!(pluralize("Box"), "Boxes");
        assert_eq!(pluralize("Day"), "Days");
        assert_eq!(pluralize(""), "");
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(mongoose_type("Reference"), "mongoose.Schema.Types.ObjectId");
        assert_eq!(mongoose_type("Enum"), "String");
        assert_eq!(
            sequelize_type("Enum", &["in".to_string(), "out".to_string()]),
            "DataTypes.ENUM('in', 'out')"
        );
        assert_eq!(sequelize_type("Number", &[]), "DataTypes.FLOAT");
    }

    #[test]
    fn test_times_is_bounded() {
        assert_eq!(times(3), vec![0, 1, 2]);
        assert_eq!(times(u32::MAX).len(), MAX_REPEAT as usize);
    }

    #[test]
    fn test_helpers_inside_templates() {
        let mut env = Environment::new();
        register(&mut env);
        env.add_template(
            "t",
            "{{ name | camel_case }}|{{ name | kebab_case | pluralize }}|{{ values | json }}|{% if values is includes('b') %}yes{% endif %}|{% for i in times(2) %}x{% endfor %}",
        )
        .unwrap();
        let out = env
            .get_template("t")
            .unwrap()
            .render(minijinja::context! { name => "StockMovement", values => vec!["a", "b"] })
            .unwrap();
        assert_eq!(out, "stockMovement|stock-movements|[\"a\",\"b\"]|yes|xx");
    }
}
