//! The closed set of packet-mutation primitives, and the [`Action`] engine
//! that binds their arguments and applies them in sequence.

use crate::config::{ActionDescriptor, HeaderDescriptor};
use crate::field::FieldValue;
use crate::packet::ParsedPacket;
use crate::{Error, Result};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Primitive {
    ModifyField { dst: String, src: String, mask: Option<String> },
    AddHeader { header: String },
    RemoveHeader { header: String },
    AddToField { field: String, constant: String },
    NoOp,
}

fn parse_call(call: &str) -> Result<(&str, Vec<&str>)> {
    let call = call.trim();
    let open = call
        .find('(')
        .ok_or_else(|| Error::Configuration(format!("malformed primitive call: {call:?}")))?;
    let close = call
        .rfind(')')
        .ok_or_else(|| Error::Configuration(format!("malformed primitive call: {call:?}")))?;
    let name = call[..open].trim();
    let args_str = call[open + 1..close].trim();
    let args = if args_str.is_empty() {
        Vec::new()
    } else {
        args_str.split(',').map(|a| a.trim()).collect()
    };
    Ok((name, args))
}

fn parse_primitive(call: &str) -> Result<Primitive> {
    let (name, args) = parse_call(call)?;
    match name {
        "modify_field" => match args.as_slice() {
            [dst, src] => Ok(Primitive::ModifyField { dst: dst.to_string(), src: src.to_string(), mask: None }),
            [dst, src, mask] => Ok(Primitive::ModifyField {
                dst: dst.to_string(),
                src: src.to_string(),
                mask: Some(mask.to_string()),
            }),
            _ => Err(Error::Configuration(format!("modify_field takes 2 or 3 args: {call:?}"))),
        },
        "add_header" => match args.as_slice() {
            [header] => Ok(Primitive::AddHeader { header: header.to_string() }),
            _ => Err(Error::Configuration(format!("add_header takes 1 arg: {call:?}"))),
        },
        "remove_header" => match args.as_slice() {
            [header] => Ok(Primitive::RemoveHeader { header: header.to_string() }),
            _ => Err(Error::Configuration(format!("remove_header takes 1 arg: {call:?}"))),
        },
        "add_to_field" => match args.as_slice() {
            [field, constant] => Ok(Primitive::AddToField { field: field.to_string(), constant: constant.to_string() }),
            _ => Err(Error::Configuration(format!("add_to_field takes 2 args: {call:?}"))),
        },
        "no_op" => Ok(Primitive::NoOp),
        other => Err(Error::Configuration(format!("unknown primitive {other:?}"))),
    }
}

/// A named, ordered sequence of primitive packet mutations.
pub struct Action {
    name: String,
    params: HashSet<String>,
    primitives: Vec<Primitive>,
    headers: HashMap<String, Arc<HeaderDescriptor>>,
}

impl Action {
    /// Parse an action's semicolon-separated primitive-call implementation.
    pub fn from_descriptor(descriptor: &ActionDescriptor, headers: HashMap<String, Arc<HeaderDescriptor>>) -> Result<Self> {
        let primitives = descriptor
            .implementation
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_primitive)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: descriptor.name.clone(),
            params: descriptor.params.iter().cloned().collect(),
            primitives,
            headers,
        })
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate this action against `packet`, binding `action_params`
    /// (formal parameter name -> bound field reference or literal) and then
    /// applying each primitive in order.
    ///
    /// Argument values are resolved eagerly, in parallel, against a single
    /// snapshot taken before any primitive runs — so later primitives in
    /// the same action never observe an earlier primitive's mutation.
    pub fn eval(&self, packet: &mut ParsedPacket, action_params: &HashMap<String, String>) -> Result<()> {
        let given: HashSet<&String> = action_params.keys().collect();
        let expected: HashSet<&String> = self.params.iter().collect();
        if given != expected {
            return Err(Error::Configuration(format!(
                "action {:?} expected params {:?}, got {:?}",
                self.name, self.params, action_params
            )));
        }

        let snapshot = |token: &str| -> FieldValue {
            if let Ok(v) = token.parse::<i64>() {
                return FieldValue::Int(v as u64);
            }
            if let Some(bound) = action_params.get(token) {
                if let Ok(v) = bound.parse::<i64>() {
                    return FieldValue::Int(v as u64);
                }
                return packet.get_field(bound);
            }
            packet.get_field(token)
        };

        let resolved: HashMap<String, FieldValue> = self
            .primitives
            .iter()
            .flat_map(|p| match p {
                Primitive::ModifyField { dst, src, mask } => {
                    let mut v = vec![dst.clone(), src.clone()];
                    if let Some(m) = mask {
                        v.push(m.clone());
                    }
                    v
                }
                Primitive::AddToField { constant, .. } => vec![constant.clone()],
                _ => vec![],
            })
            .map(|token| {
                let v = snapshot(&token);
                (token, v)
            })
            .collect();

        for primitive in &self.primitives {
            match primitive {
                Primitive::ModifyField { dst, src, mask } => {
                    let src_val = resolved.get(src).cloned().unwrap_or(FieldValue::Int(0)).as_int();
                    let new_val = if let Some(mask_tok) = mask {
                        let mask_val = resolved.get(mask_tok).cloned().unwrap_or(FieldValue::Int(0)).as_int();
                        let cur = resolved.get(dst).cloned().unwrap_or(FieldValue::Int(0)).as_int();
                        (cur & !mask_val) | (src_val & mask_val)
                    } else {
                        src_val
                    };
                    if packet.set_field(dst, FieldValue::Int(new_val)).is_none() {
                        debug!("modify_field: dst {dst:?} not found on packet");
                    }
                }
                Primitive::AddToField { field, constant } => {
                    let delta = resolved.get(constant).cloned().unwrap_or(FieldValue::Int(0)).as_int();
                    let cur = packet.get_field(field).as_int();
                    if packet.set_field(field, FieldValue::Int(cur.wrapping_add(delta))).is_none() {
                        debug!("add_to_field: field {field:?} not found on packet");
                    }
                }
                Primitive::AddHeader { header } => {
                    let descr = self
                        .headers
                        .get(header)
                        .ok_or_else(|| Error::Configuration(format!("unknown header {header:?} in add_header")))?;
                    if let Err(e) = packet.append_header(header, Arc::clone(descr)) {
                        debug!("add_header: {e}");
                    }
                }
                Primitive::RemoveHeader { header } => {
                    if packet.remove_header(header).is_none() {
                        debug!("remove_header: header {header:?} not present");
                    }
                }
                Primitive::NoOp => {}
            }
        }
        Ok(())
    }
}
