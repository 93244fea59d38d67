//! Recursive expression parsing.
//!
//! Decodes the tagged-length expression encoding into a [`Sexp`] tree.
//! Every slice handed to a node is bounds-checked against the buffer it
//! came from; a declared length that overruns the buffer is a framing
//! violation, never an out-of-range read.

use bytes::Bytes;

use super::node::{RList, RStrings, Sexp, SexpKind};
use crate::error::{Result, RserveError};
use crate::protocol::{xt, ItemHeader, TYPE_MASK};

/// Parse the expression at the start of `data`.
pub fn parse_sexp(data: &Bytes) -> Result<Sexp> {
    parse_at(data).map(|(sexp, _)| sexp)
}

/// Parse the expression at the start of `data`, returning the node and
/// the number of bytes its encoding occupies (so a sibling can be parsed
/// at the returned offset).
pub fn parse_at(data: &Bytes) -> Result<(Sexp, usize)> {
    let (header, header_len) = ItemHeader::decode(data)?;
    let end = header_len
        .checked_add(header.len)
        .ok_or(RserveError::MalformedPacket)?;
    if end > data.len() {
        return Err(RserveError::MalformedPacket);
    }
    let mut content = data.slice(header_len..end);

    // An attribute expression occupies the start of the content region;
    // the node's own content begins after it.
    let mut attr = None;
    if header.has_attr {
        let (attr_node, attr_len) = parse_at(&content)?;
        content = content.slice(attr_len..);
        attr = Some(Box::new(attr_node));
    }

    tracing::trace!(ty = header.ty, len = content.len(), "parse expression");

    let kind = match header.ty {
        xt::NULL => SexpKind::Null,
        xt::INT | xt::ARRAY_INT => SexpKind::Ints(decode_ints(&content)?),
        xt::DOUBLE | xt::ARRAY_DOUBLE => SexpKind::Doubles(decode_doubles(&content)?),
        xt::STR => SexpKind::Str(content),
        xt::SYM => SexpKind::Symbol(symbol_name(&content)),
        xt::SYMNAME => SexpKind::Symbol(content),
        xt::ARRAY_STR => SexpKind::Strings(RStrings::new(content)),
        xt::VECTOR | xt::VECTOR_EXP | xt::VECTOR_STR => {
            SexpKind::Vector(parse_children(&content)?)
        }
        xt::LIST => SexpKind::List(parse_classic_list(&content)?),
        xt::LIST_NOTAG | xt::LANG_NOTAG => SexpKind::List(parse_untagged_list(&content)?),
        xt::LIST_TAG | xt::LANG_TAG => SexpKind::List(parse_tagged_list(&content)?),
        _ => SexpKind::Raw(content),
    };

    Ok((Sexp::with_type(header.ty, kind, attr), end))
}

/// Decode integer content from wire order to host order.
fn decode_ints(content: &Bytes) -> Result<Vec<i32>> {
    if content.len() % 4 != 0 {
        return Err(RserveError::MalformedPacket);
    }
    Ok(content
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Decode double content from wire order to host order.
fn decode_doubles(content: &Bytes) -> Result<Vec<f64>> {
    if content.len() % 8 != 0 {
        return Err(RserveError::MalformedPacket);
    }
    Ok(content
        .chunks_exact(8)
        .map(|c| {
            f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
        })
        .collect())
}

/// A symbol carries its printable name as a nested string expression;
/// the name starts right past that string's fixed 4-byte header.
fn symbol_name(content: &Bytes) -> Bytes {
    if content.len() >= 4 && (content[0] & TYPE_MASK as u8) == xt::STR {
        content.slice(4..)
    } else {
        Bytes::new()
    }
}

/// Parse consecutive children until the content region is exhausted.
fn parse_children(content: &Bytes) -> Result<Vec<Sexp>> {
    let mut children = Vec::with_capacity(16);
    let mut cursor = 0;
    while cursor < content.len() {
        let (child, consumed) = parse_at(&content.slice(cursor..))?;
        children.push(child);
        cursor += consumed;
    }
    Ok(children)
}

/// Classic list form: up to three consecutive children — head, tail
/// (itself a list, discarded if not) and tag.
fn parse_classic_list(content: &Bytes) -> Result<RList> {
    let mut list = RList::default();
    let mut cursor = 0;
    if cursor < content.len() {
        let (head, consumed) = parse_at(content)?;
        list.head = Some(Box::new(head));
        cursor += consumed;
        if cursor < content.len() {
            let (tail, consumed) = parse_at(&content.slice(cursor..))?;
            cursor += consumed;
            if cursor < content.len() {
                let (tag, _) = parse_at(&content.slice(cursor..))?;
                list.tag = Some(Box::new(tag));
            }
            if let SexpKind::List(tail) = tail.kind {
                list.tail = Some(Box::new(tail));
            }
        }
    }
    Ok(list)
}

/// Untagged list form: one child per cell until exhausted.
fn parse_untagged_list(content: &Bytes) -> Result<RList> {
    let mut cells = Vec::new();
    let mut cursor = 0;
    while cursor < content.len() {
        let (child, consumed) = parse_at(&content.slice(cursor..))?;
        cells.push((child, None));
        cursor += consumed;
    }
    Ok(RList::from_cells(cells))
}

/// Tagged list form: (value, tag) pairs until exhausted. A trailing
/// value with no room left for its tag is dropped.
fn parse_tagged_list(content: &Bytes) -> Result<RList> {
    let mut cells = Vec::new();
    let mut cursor = 0;
    while cursor < content.len() {
        let (value, consumed) = parse_at(&content.slice(cursor..))?;
        cursor += consumed;
        if cursor >= content.len() {
            break;
        }
        let (tag, consumed) = parse_at(&content.slice(cursor..))?;
        cursor += consumed;
        cells.push((value, Some(tag)));
    }
    Ok(RList::from_cells(cells))
}
