//! Built-in parameter schemas for assets and the catalog entities around them.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::filters::{format_php_date, parse_datetime};
use super::schema::{ParameterNode, SchemaRegistry, TemplateSchema};
use crate::assets::KindRegistry;

const DISPLAY_DATE_FORMAT: &str = "Y-m-d H:i";

/// Registry with the ticket, asset, location, user and group schemas.
pub fn builtin_schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(ticket_schema);
    registry.register(asset_schema);
    registry.register(location_schema);
    registry.register(user_schema);
    registry.register(group_schema);
    registry
}

pub fn asset_schema() -> TemplateSchema {
    TemplateSchema {
        root_key: "asset".to_string(),
        label: "Asset".to_string(),
        target_kinds: KindRegistry::builtin().graphable_kinds(),
        parameters: vec![
            ParameterNode::attribute("id", "ID"),
            ParameterNode::attribute("name", "Name"),
            ParameterNode::attribute("itemtype", "Item type"),
            ParameterNode::attribute("serial", "Serial number"),
            ParameterNode::attribute("otherserial", "Inventory number"),
            ParameterNode::attribute("comment", "Comments"),
            ParameterNode::transformed("date_mod", "Last update", format_date),
            ParameterNode::object("location", "Location", location_schema),
            ParameterNode::object("user", "User", user_schema),
            ParameterNode::object("group", "Group", group_schema),
        ],
    }
}

pub fn ticket_schema() -> TemplateSchema {
    TemplateSchema {
        root_key: "ticket".to_string(),
        label: "Ticket".to_string(),
        target_kinds: vec!["Ticket".to_string()],
        parameters: vec![
            ParameterNode::attribute("id", "ID"),
            ParameterNode::attribute("name", "Title"),
            ParameterNode::transformed("content", "Description", html_to_text),
            ParameterNode::transformed("status", "Status", ticket_status_label),
            ParameterNode::attribute("urgency", "Urgency"),
            ParameterNode::attribute("impact", "Impact"),
            ParameterNode::attribute("priority", "Priority"),
            ParameterNode::transformed("date", "Opening date", format_date),
            ParameterNode::transformed("solvedate", "Resolution date", format_date),
            ParameterNode::transformed("closedate", "Closing date", format_date),
            ParameterNode::object("location", "Location", location_schema),
            ParameterNode::array("requesters", "requester", "Requesters", user_schema),
            ParameterNode::array("observers", "observer", "Observers", user_schema),
            ParameterNode::array("assignees", "assignee", "Assigned to", user_schema),
            ParameterNode::array("groups", "group", "Groups", group_schema),
            ParameterNode::array("assets", "asset", "Items", asset_schema),
        ],
    }
}

pub fn location_schema() -> TemplateSchema {
    TemplateSchema {
        root_key: "location".to_string(),
        label: "Location".to_string(),
        target_kinds: vec!["Location".to_string()],
        parameters: vec![
            ParameterNode::attribute("id", "ID"),
            ParameterNode::attribute("name", "Name"),
            ParameterNode::attribute("completename", "Complete name"),
            ParameterNode::attribute("address", "Address"),
            ParameterNode::attribute("town", "City"),
            ParameterNode::attribute("postcode", "Postal code"),
            ParameterNode::attribute("state", "State"),
            ParameterNode::attribute("country", "Country"),
            ParameterNode::object("parent", "Parent location", location_schema),
        ],
    }
}

pub fn user_schema() -> TemplateSchema {
    TemplateSchema {
        root_key: "user".to_string(),
        label: "User".to_string(),
        target_kinds: vec!["User".to_string()],
        parameters: vec![
            ParameterNode::attribute("id", "ID"),
            ParameterNode::attribute("name", "Login"),
            ParameterNode::attribute("realname", "Surname"),
            ParameterNode::attribute("firstname", "First name"),
            ParameterNode::attribute("email", "Email"),
            ParameterNode::attribute("phone", "Phone"),
            ParameterNode::object("location", "Location", location_schema),
        ],
    }
}

pub fn group_schema() -> TemplateSchema {
    TemplateSchema {
        root_key: "group".to_string(),
        label: "Group".to_string(),
        target_kinds: vec!["Group".to_string()],
        parameters: vec![
            ParameterNode::attribute("id", "ID"),
            ParameterNode::attribute("name", "Name"),
            ParameterNode::attribute("completename", "Complete name"),
            ParameterNode::attribute("comment", "Comments"),
        ],
    }
}

fn format_date(value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match parse_datetime(value) {
        Ok(moment) => Value::String(format_php_date(&moment, DISPLAY_DATE_FORMAT)),
        Err(_) => value.clone(),
    }
}

fn ticket_status_label(value: &Value) -> Value {
    let code = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let label = match code {
        Some(1) => "New",
        Some(2) => "Processing (assigned)",
        Some(3) => "Processing (planned)",
        Some(4) => "Pending",
        Some(5) => "Solved",
        Some(6) => "Closed",
        _ => return value.clone(),
    };
    Value::String(label.to_string())
}

fn html_to_text(value: &Value) -> Value {
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();

    let Some(html) = value.as_str() else {
        return value.clone();
    };
    let breaks = BREAKS.get_or_init(|| {
        Regex::new(r"(?i)<\s*(?:br\s*/?|/p|/div|/li|/tr|/h[1-6])\s*>").expect("Invalid regex pattern")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("Invalid regex pattern"));
    let blanks = BLANKS.get_or_init(|| Regex::new(r"[ \t]+").expect("Invalid regex pattern"));

    let text = breaks.replace_all(html, "\n");
    let text = tags.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = blanks.replace_all(&text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    Value::String(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemoryStore;
    use serde_json::{json, Map};

    #[test]
    fn test_status_labels() {
        assert_eq!(ticket_status_label(&json!(1)), json!("New"));
        assert_eq!(ticket_status_label(&json!("5")), json!("Solved"));
        assert_eq!(ticket_status_label(&json!(42)), json!(42));
    }

    #[test]
    fn test_html_to_text() {
        let html = json!("<p>Printer&nbsp;is <b>down</b></p><p>Since 9 &amp; counting</p>");
        assert_eq!(html_to_text(&html), json!("Printer is down\nSince 9 & counting"));
    }

    #[test]
    fn test_date_transform() {
        assert_eq!(format_date(&json!("2024-06-01 08:30:00")), json!("2024-06-01 08:30"));
        assert_eq!(format_date(&Value::Null), Value::Null);
        assert_eq!(format_date(&json!("soon")), json!("soon"));
    }

    #[test]
    fn test_builtin_lookup_by_kind() {
        let registry = builtin_schemas();
        assert_eq!(registry.for_kind("Ticket").unwrap().root_key, "ticket");
        assert_eq!(registry.for_kind("Computer").unwrap().root_key, "asset");
        assert_eq!(registry.for_kind("Location").unwrap().root_key, "location");
        assert!(registry.for_kind("Change").is_none());
    }

    #[test]
    fn test_ticket_values() {
        let store = MemoryStore::new();
        let mut fields = Map::new();
        fields.insert("status".to_string(), json!(2));
        fields.insert("content".to_string(), json!("<p>Broken</p>"));
        store.add_entity_with_fields("Ticket", 10, "Mail down", fields);
        store.add_entity("User", 1, "ann");
        store.add_entity("Computer", 4, "mx-01");
        store.link(("Ticket", 10), "requesters", ("User", 1));
        store.link(("Ticket", 10), "assets", ("Computer", 4));

        let values = ticket_schema()
            .get_values(&store.entity("Ticket", 10), true, &store, 8)
            .unwrap();
        let ticket = &values["ticket"];
        assert_eq!(ticket["status"], json!("Processing (assigned)"));
        assert_eq!(ticket["content"], json!("Broken"));
        assert_eq!(ticket["requesters"][0]["name"], json!("ann"));
        assert_eq!(ticket["assets"][0]["itemtype"], json!("Computer"));
        assert_eq!(ticket["observers"], json!([]));
        assert!(ticket.get("location").is_none());
    }

    #[test]
    fn test_location_parameters_are_finite() {
        let described = serde_json::to_value(location_schema().compute_available_parameters()).unwrap();
        let parent = described["properties"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["key"] == "parent")
            .cloned()
            .unwrap();
        assert_eq!(parent["properties"], json!([]));
    }
}
