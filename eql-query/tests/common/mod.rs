//! A small robot/item/connection domain wired through the reflection
//! bridge, shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use eql_symbols::{AccessError, Symbol, SymbolRegistry, TypeInfo, Value};

pub static ROBOT: TypeInfo = TypeInfo::new("Robot", None);
pub static ASTROMECH: TypeInfo = TypeInfo::new("Astromech", Some(&ROBOT));
pub static PART: TypeInfo = TypeInfo::new("Part", None);
pub static ITEM: TypeInfo = TypeInfo::new("Item", None);
pub static CONNECTION: TypeInfo = TypeInfo::new("Connection", None);
pub static VIEW: TypeInfo = TypeInfo::new("View", None);
pub static FIXED_VIEW: TypeInfo = TypeInfo::new("FixedView", Some(&VIEW));
pub static REVOLUTE_VIEW: TypeInfo = TypeInfo::new("RevoluteView", Some(&VIEW));

fn missing(info: &'static TypeInfo, attribute: &str) -> AccessError {
    AccessError::MissingAttribute {
        type_name: info.name,
        attribute: attribute.to_string(),
    }
}

#[derive(Debug)]
pub struct Part {
    pub label: String,
}

impl Symbol for Part {
    fn type_info(&self) -> &'static TypeInfo {
        &PART
    }

    fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match name {
            "label" => Ok(Value::Text(self.label.clone())),
            other => Err(missing(&PART, other)),
        }
    }

    fn display(&self) -> String {
        format!("Part({})", self.label)
    }
}

pub fn part(label: &str) -> Arc<Part> {
    Arc::new(Part {
        label: label.to_string(),
    })
}

#[derive(Debug)]
pub struct Robot {
    pub info: &'static TypeInfo,
    pub name: String,
    pub kind: String,
    pub battery: i64,
    pub parts: Vec<Arc<Part>>,
}

impl Symbol for Robot {
    fn type_info(&self) -> &'static TypeInfo {
        self.info
    }

    fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match name {
            "name" => Ok(Value::Text(self.name.clone())),
            "kind" => Ok(Value::Text(self.kind.clone())),
            "battery" => Ok(Value::Integer(self.battery)),
            "parts" => Ok(Value::List(
                self.parts.iter().map(|p| Value::from(p)).collect(),
            )),
            other => Err(missing(self.info, other)),
        }
    }

    fn display(&self) -> String {
        format!("Robot({})", self.name)
    }
}

pub fn robot(name: &str, kind: &str, battery: i64) -> Arc<Robot> {
    Arc::new(Robot {
        info: &ROBOT,
        name: name.to_string(),
        kind: kind.to_string(),
        battery,
        parts: Vec::new(),
    })
}

pub fn astromech(name: &str, battery: i64) -> Arc<Robot> {
    Arc::new(Robot {
        info: &ASTROMECH,
        name: name.to_string(),
        kind: "Astromech".to_string(),
        battery,
        parts: Vec::new(),
    })
}

pub fn robot_with_parts(name: &str, battery: i64, parts: Vec<Arc<Part>>) -> Arc<Robot> {
    Arc::new(Robot {
        info: &ROBOT,
        name: name.to_string(),
        kind: "generic".to_string(),
        battery,
        parts,
    })
}

#[derive(Debug)]
pub struct Item {
    pub serial: String,
    pub payload: String,
}

impl Symbol for Item {
    fn type_info(&self) -> &'static TypeInfo {
        &ITEM
    }

    fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match name {
            "serial" => Ok(Value::Text(self.serial.clone())),
            "payload" => Ok(Value::Text(self.payload.clone())),
            other => Err(missing(&ITEM, other)),
        }
    }

    fn display(&self) -> String {
        format!("Item({}, {})", self.serial, self.payload)
    }
}

pub fn item(serial: &str, payload: &str) -> Arc<Item> {
    Arc::new(Item {
        serial: serial.to_string(),
        payload: payload.to_string(),
    })
}

#[derive(Debug)]
pub struct Connection {
    pub kind: i64,
}

impl Symbol for Connection {
    fn type_info(&self) -> &'static TypeInfo {
        &CONNECTION
    }

    fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match name {
            "type" => Ok(Value::Integer(self.kind)),
            other => Err(missing(&CONNECTION, other)),
        }
    }

    fn display(&self) -> String {
        format!("Connection(type={})", self.kind)
    }
}

pub fn connection(kind: i64) -> Arc<Connection> {
    Arc::new(Connection { kind })
}

/// A view over a connection, with the concrete flavor carried in its
/// type descriptor. Constructed by inference in the rule-tree tests.
#[derive(Debug)]
pub struct View {
    pub info: &'static TypeInfo,
    pub connection: Value,
}

impl Symbol for View {
    fn type_info(&self) -> &'static TypeInfo {
        self.info
    }

    fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match name {
            "connection" => Ok(self.connection.clone()),
            other => Err(missing(self.info, other)),
        }
    }

    fn display(&self) -> String {
        format!("{}({:?})", self.info.name, self.connection)
    }
}

/// Constructor suitable for `inference(ty, ...)`: builds a `View` of
/// the given flavor from the `connection` keyword argument.
pub fn view_constructor(
    info: &'static TypeInfo,
) -> impl Fn(&std::collections::BTreeMap<String, Value>) -> Result<Value, String> {
    move |kwargs| {
        let connection = kwargs
            .get("connection")
            .cloned()
            .ok_or_else(|| "view requires a connection".to_string())?;
        Ok(Value::Object(Arc::new(View { info, connection })))
    }
}

/// Domain helper: a list of object values.
pub fn values<S: Symbol + 'static>(objects: &[Arc<S>]) -> Vec<Value> {
    objects.iter().map(Value::from).collect()
}

/// A registry pre-loaded with the given robots.
pub fn registry_of(robots: &[Arc<Robot>]) -> SymbolRegistry {
    let registry = SymbolRegistry::new();
    for robot in robots {
        registry.register(robot);
    }
    registry
}

/// Read an attribute off an object value, for assertions.
pub fn attr_of(value: &Value, name: &str) -> Value {
    value.attr(name).expect("attribute present")
}
