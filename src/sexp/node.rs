//! Decoded R expression nodes.
//!
//! A [`Sexp`] is one element of the server's type system: a closed sum of
//! the wire kinds this client understands plus a raw fallback for the
//! rest. Byte-ish content (`Str`, `Symbol`, `Strings`, `Raw`) is a
//! zero-copy `Bytes` slice of the received payload; numeric leaves are
//! decoded to host order exactly once, at parse time. Nodes built locally
//! (for [`assign`](crate::Connection::assign)) own their content.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{padded_string_len, xt, ItemHeader};

/// One decoded R expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Sexp {
    ty: u8,
    /// Decoded content.
    pub kind: SexpKind,
    /// Attribute expression, conventionally a tagged list of name→value
    /// pairs.
    pub attr: Option<Box<Sexp>>,
}

/// Content of a [`Sexp`], one variant per wire kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SexpKind {
    Null,
    /// Integer vector (`XT_ARRAY_INT` / scalar `XT_INT`).
    Ints(Vec<i32>),
    /// Double vector (`XT_ARRAY_DOUBLE` / scalar `XT_DOUBLE`).
    Doubles(Vec<f64>),
    /// Single string, NUL-terminated and padded on the wire.
    Str(Bytes),
    /// Symbol name (`XT_SYM` / `XT_SYMNAME`).
    Symbol(Bytes),
    /// Packed string array (`XT_ARRAY_STR`).
    Strings(RStrings),
    /// Generic list (classic, untagged or tagged form).
    List(RList),
    /// Ordered heterogeneous children (`XT_VECTOR` and friends).
    Vector(Vec<Sexp>),
    /// Content of a tag this client does not interpret.
    Raw(Bytes),
}

impl Sexp {
    pub(crate) fn with_type(ty: u8, kind: SexpKind, attr: Option<Box<Sexp>>) -> Self {
        Self { ty, kind, attr }
    }

    /// The wire type tag (low 6 bits).
    #[inline]
    pub fn wire_type(&self) -> u8 {
        self.ty
    }

    /// The R NULL value.
    pub fn null() -> Self {
        Self::with_type(xt::NULL, SexpKind::Null, None)
    }

    /// A single string value, padded for the wire.
    pub fn string(text: &str) -> Self {
        let padded = padded_string_len(text);
        let mut buf = BytesMut::with_capacity(padded);
        buf.put_slice(text.as_bytes());
        buf.put_bytes(0, padded - text.len());
        Self::with_type(xt::STR, SexpKind::Str(buf.freeze()), None)
    }

    /// An integer vector value.
    pub fn ints(values: &[i32]) -> Self {
        Self::with_type(xt::ARRAY_INT, SexpKind::Ints(values.to_vec()), None)
    }

    /// A double vector value.
    pub fn doubles(values: &[f64]) -> Self {
        Self::with_type(xt::ARRAY_DOUBLE, SexpKind::Doubles(values.to_vec()), None)
    }

    /// A symbol value.
    pub fn symbol(name: &str) -> Self {
        let padded = padded_string_len(name);
        let mut buf = BytesMut::with_capacity(padded);
        buf.put_slice(name.as_bytes());
        buf.put_bytes(0, padded - name.len());
        Self::with_type(xt::SYMNAME, SexpKind::Symbol(buf.freeze()), None)
    }

    /// The string content, for `Str` nodes.
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            SexpKind::Str(data) => Some(str_from_padded(data)),
            _ => None,
        }
    }

    /// The printable name, for `Symbol` nodes.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            SexpKind::Symbol(data) => Some(str_from_padded(data)),
            _ => None,
        }
    }

    /// The integer elements, for `Ints` nodes.
    pub fn as_ints(&self) -> Option<&[i32]> {
        match &self.kind {
            SexpKind::Ints(v) => Some(v),
            _ => None,
        }
    }

    /// The double elements, for `Doubles` nodes.
    pub fn as_doubles(&self) -> Option<&[f64]> {
        match &self.kind {
            SexpKind::Doubles(v) => Some(v),
            _ => None,
        }
    }

    /// Look up an attribute value by its tag name.
    pub fn attribute(&self, name: &str) -> Option<&Sexp> {
        match self.attr.as_deref() {
            Some(Sexp {
                kind: SexpKind::List(list),
                ..
            }) => list.entry_by_tag_name(name),
            _ => None,
        }
    }

    /// The tag names present on the attribute list.
    pub fn attribute_names(&self) -> Vec<&str> {
        match self.attr.as_deref() {
            Some(Sexp {
                kind: SexpKind::List(list),
                ..
            }) => list
                .iter()
                .filter_map(|(_, tag)| tag.and_then(Sexp::name))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Find a vector child by identity, for `Vector` nodes.
    pub fn index_of(&self, child: &Sexp) -> Option<usize> {
        match &self.kind {
            SexpKind::Vector(children) => children.iter().position(|c| c == child),
            _ => None,
        }
    }

    /// Find the position of a string-typed child equal to `wanted`.
    pub fn index_of_string(&self, wanted: &str) -> Option<usize> {
        match &self.kind {
            SexpKind::Vector(children) => children
                .iter()
                .position(|c| c.as_str() == Some(wanted)),
            _ => None,
        }
    }

    /// The string-typed children of a `Vector` node.
    pub fn strings(&self) -> Vec<&str> {
        match &self.kind {
            SexpKind::Vector(children) => {
                children.iter().filter_map(Sexp::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Resolve a vector child through the `names` attribute.
    ///
    /// The names may be carried as a tagged attribute list entry, a
    /// vector of strings, a packed string array or a single string.
    pub fn by_name(&self, name: &str) -> Option<&Sexp> {
        let children = match &self.kind {
            SexpKind::Vector(children) if !children.is_empty() => children,
            _ => return None,
        };
        let list = match self.attr.as_deref() {
            Some(Sexp {
                kind: SexpKind::List(list),
                ..
            }) => list,
            _ => return None,
        };
        let names = if list.iter().any(|(_, tag)| tag.is_some()) {
            list.entry_by_tag_name("names")?
        } else {
            list.head.as_deref()?
        };
        let pos = match &names.kind {
            SexpKind::Vector(_) => names.index_of_string(name)?,
            SexpKind::Strings(strs) => strs.index_of(name)?,
            SexpKind::Str(_) => {
                if names.as_str() == Some(name) {
                    0
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        children.get(pos)
    }

    /// Content length of the wire encoding.
    pub fn content_len(&self) -> usize {
        match &self.kind {
            SexpKind::Null => 0,
            SexpKind::Ints(v) => v.len() * 4,
            SexpKind::Doubles(v) => v.len() * 8,
            SexpKind::Str(data) | SexpKind::Symbol(data) | SexpKind::Raw(data) => data.len(),
            SexpKind::Strings(strs) => strs.data.len(),
            SexpKind::Vector(children) => children.iter().map(Sexp::storage_size).sum(),
            SexpKind::List(list) => list.content_len(self.ty),
        }
    }

    /// Total wire size: item header plus content, using the LARGE header
    /// form when the content exceeds the 24-bit threshold.
    pub fn storage_size(&self) -> usize {
        let len = self.content_len();
        ItemHeader::new(self.ty, len).encoded_len() + len
    }

    /// Append the wire encoding of this expression to `buf`.
    ///
    /// Attributes are not serialized; this mirrors what the reference
    /// clients send for assignments.
    pub fn store(&self, buf: &mut BytesMut) {
        ItemHeader::new(self.ty, self.content_len()).encode_into(buf);
        match &self.kind {
            SexpKind::Null => {}
            SexpKind::Ints(v) => {
                for value in v {
                    buf.put_i32_le(*value);
                }
            }
            SexpKind::Doubles(v) => {
                for value in v {
                    buf.put_f64_le(*value);
                }
            }
            SexpKind::Str(data) | SexpKind::Symbol(data) | SexpKind::Raw(data) => {
                buf.put_slice(data);
            }
            SexpKind::Strings(strs) => buf.put_slice(&strs.data),
            SexpKind::Vector(children) => {
                for child in children {
                    child.store(buf);
                }
            }
            SexpKind::List(list) => list.store(self.ty, buf),
        }
    }
}

/// A list chain: `head` value, optional `tag`, optional `tail` rest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RList {
    pub head: Option<Box<Sexp>>,
    pub tag: Option<Box<Sexp>>,
    pub tail: Option<Box<RList>>,
}

impl RList {
    /// Build a chain from `(value, tag)` cells.
    pub fn from_cells(cells: Vec<(Sexp, Option<Sexp>)>) -> Self {
        let mut chain: Option<Box<RList>> = None;
        for (value, tag) in cells.into_iter().rev() {
            chain = Some(Box::new(RList {
                head: Some(Box::new(value)),
                tag: tag.map(Box::new),
                tail: chain,
            }));
        }
        chain.map(|b| *b).unwrap_or_default()
    }

    /// Iterate the cells of this chain as `(head, tag)` pairs.
    pub fn iter(&self) -> RListIter<'_> {
        RListIter { next: Some(self) }
    }

    /// Number of cells holding a value.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True when the chain holds no value.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Find the head of the cell whose tag is a symbol named `name`.
    pub fn entry_by_tag_name(&self, name: &str) -> Option<&Sexp> {
        self.iter()
            .find(|(_, tag)| tag.and_then(Sexp::name) == Some(name))
            .map(|(head, _)| head)
    }

    fn content_len(&self, ty: u8) -> usize {
        match ty {
            xt::LIST_TAG | xt::LANG_TAG => self
                .iter()
                .map(|(head, tag)| {
                    head.storage_size() + tag.map_or(0, Sexp::storage_size)
                })
                .sum(),
            xt::LIST_NOTAG | xt::LANG_NOTAG => {
                self.iter().map(|(head, _)| head.storage_size()).sum()
            }
            _ => {
                // classic form: head, tail list, tag
                let mut len = 0;
                if let Some(head) = &self.head {
                    len += head.storage_size();
                }
                if let Some(tail) = &self.tail {
                    let tail_len = tail.content_len(xt::LIST);
                    len += ItemHeader::new(xt::LIST, tail_len).encoded_len() + tail_len;
                }
                if let Some(tag) = &self.tag {
                    len += tag.storage_size();
                }
                len
            }
        }
    }

    fn store(&self, ty: u8, buf: &mut BytesMut) {
        match ty {
            xt::LIST_TAG | xt::LANG_TAG => {
                for (head, tag) in self.iter() {
                    head.store(buf);
                    if let Some(tag) = tag {
                        tag.store(buf);
                    }
                }
            }
            xt::LIST_NOTAG | xt::LANG_NOTAG => {
                for (head, _) in self.iter() {
                    head.store(buf);
                }
            }
            _ => {
                if let Some(head) = &self.head {
                    head.store(buf);
                }
                if let Some(tail) = &self.tail {
                    ItemHeader::new(xt::LIST, tail.content_len(xt::LIST)).encode_into(buf);
                    tail.store(xt::LIST, buf);
                }
                if let Some(tag) = &self.tag {
                    tag.store(buf);
                }
            }
        }
    }
}

/// Iterator over list cells.
pub struct RListIter<'a> {
    next: Option<&'a RList>,
}

impl<'a> Iterator for RListIter<'a> {
    type Item = (&'a Sexp, Option<&'a Sexp>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cell = self.next.take()?;
            self.next = cell.tail.as_deref();
            if let Some(head) = cell.head.as_deref() {
                return Some((head, cell.tag.as_deref()));
            }
        }
    }
}

/// A packed array of NUL-terminated strings.
#[derive(Debug, Clone, PartialEq)]
pub struct RStrings {
    pub(crate) data: Bytes,
}

impl RStrings {
    /// Wrap packed string-array content.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Iterate the strings in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let mut rest: &[u8] = &self.data;
        std::iter::from_fn(move || {
            let nul = rest.iter().position(|&b| b == 0)?;
            let (s, tail) = rest.split_at(nul);
            rest = &tail[1..];
            Some(std::str::from_utf8(s).unwrap_or(""))
        })
    }

    /// Number of strings in the array.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True when the array holds no strings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the string at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.iter().nth(index)
    }

    /// Find the position of a string equal to `wanted`.
    pub fn index_of(&self, wanted: &str) -> Option<usize> {
        self.iter().position(|s| s == wanted)
    }
}

/// View padded, NUL-terminated content as a str, up to the first NUL.
fn str_from_padded(data: &Bytes) -> &str {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_constructor_pads() {
        let s = Sexp::string("hi");
        assert_eq!(s.as_str(), Some("hi"));
        assert_eq!(s.content_len(), 4);
        assert_eq!(s.storage_size(), 8);

        let mut buf = BytesMut::new();
        s.store(&mut buf);
        assert_eq!(&buf[..], &[xt::STR, 4, 0, 0, b'h', b'i', 0, 0]);
    }

    #[test]
    fn test_ints_store_little_endian() {
        let v = Sexp::ints(&[1, 2]);
        assert_eq!(v.content_len(), 8);

        let mut buf = BytesMut::new();
        v.store(&mut buf);
        assert_eq!(&buf[4..8], &1i32.to_le_bytes());
        assert_eq!(&buf[8..12], &2i32.to_le_bytes());
    }

    #[test]
    fn test_list_chain_iteration() {
        let list = RList::from_cells(vec![
            (Sexp::ints(&[1]), Some(Sexp::symbol("a"))),
            (Sexp::ints(&[2]), Some(Sexp::symbol("b"))),
        ]);
        assert_eq!(list.len(), 2);

        let tags: Vec<_> = list
            .iter()
            .filter_map(|(_, tag)| tag.and_then(Sexp::name))
            .collect();
        assert_eq!(tags, ["a", "b"]);

        let entry = list.entry_by_tag_name("b").unwrap();
        assert_eq!(entry.as_ints(), Some(&[2][..]));
        assert!(list.entry_by_tag_name("c").is_none());
    }

    #[test]
    fn test_vector_lookups() {
        let v = Sexp::with_type(
            xt::VECTOR,
            SexpKind::Vector(vec![
                Sexp::string("alpha"),
                Sexp::ints(&[5]),
                Sexp::string("beta"),
            ]),
            None,
        );
        assert_eq!(v.index_of_string("beta"), Some(2));
        assert_eq!(v.index_of_string("gamma"), None);
        assert_eq!(v.index_of(&Sexp::ints(&[5])), Some(1));
        assert_eq!(v.strings(), ["alpha", "beta"]);
    }

    #[test]
    fn test_by_name_via_tagged_attribute_list() {
        let names = Sexp::with_type(
            xt::ARRAY_STR,
            SexpKind::Strings(RStrings::new(Bytes::from_static(b"x\0y\0"))),
            None,
        );
        let attr_list = RList::from_cells(vec![(names, Some(Sexp::symbol("names")))]);
        let attr = Sexp::with_type(xt::LIST_TAG, SexpKind::List(attr_list), None);

        let v = Sexp::with_type(
            xt::VECTOR,
            SexpKind::Vector(vec![Sexp::ints(&[10]), Sexp::ints(&[20])]),
            Some(Box::new(attr)),
        );

        assert_eq!(v.by_name("y").unwrap().as_ints(), Some(&[20][..]));
        assert!(v.by_name("z").is_none());
    }

    #[test]
    fn test_strings_array_lookup() {
        let strs = RStrings::new(Bytes::from_static(b"one\0two\0three\0\x01\x01"));
        assert_eq!(strs.len(), 3);
        assert_eq!(strs.get(1), Some("two"));
        assert_eq!(strs.index_of("three"), Some(2));
        assert_eq!(strs.index_of("four"), None);
    }

    #[test]
    fn test_attribute_lookup() {
        let attr_list = RList::from_cells(vec![(
            Sexp::string("data.frame"),
            Some(Sexp::symbol("class")),
        )]);
        let attr = Sexp::with_type(xt::LIST_TAG, SexpKind::List(attr_list), None);
        let node = Sexp::with_type(
            xt::VECTOR,
            SexpKind::Vector(vec![]),
            Some(Box::new(attr)),
        );

        assert_eq!(
            node.attribute("class").and_then(Sexp::as_str),
            Some("data.frame")
        );
        assert_eq!(node.attribute_names(), ["class"]);
        assert!(node.attribute("names").is_none());
    }

    #[test]
    fn test_large_content_uses_extended_header() {
        let data = Bytes::from(vec![0u8; 0x80_0000]);
        let node = Sexp::with_type(xt::RAW, SexpKind::Raw(data), None);
        assert_eq!(node.storage_size(), 8 + 0x80_0000);
    }
}
