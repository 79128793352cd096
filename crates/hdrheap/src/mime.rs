//! MIME headers stored in a header heap.
//!
//! Field order is preserved and names may repeat. Name lookups ignore ASCII
//! case. Names are always copied into the heap; values may be copied or
//! aliased.

use crate::error::{Result, Violation};
use crate::heap::HdrHeap;
use crate::obj::{ObjHandle, ObjKind, Relocatable, StrRef, StrValue};

/// One `name: value` line.
#[derive(Debug, Clone, Default)]
pub struct MimeField {
    /// Field name, always a copied string.
    pub name: StrRef,
    /// Field value, copied or aliased.
    pub value: StrRef,
}

/// An ordered list of MIME fields.
#[derive(Debug, Clone, Default)]
pub struct MimeHdr {
    fields: Vec<MimeField>,
}

impl MimeHdr {
    /// Fields in attach order.
    #[must_use]
    pub fn fields(&self) -> &[MimeField] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Relocatable for MimeHdr {
    fn visit_strs(&self, visitor: &mut dyn FnMut(&StrRef)) {
        for field in &self.fields {
            visitor(&field.name);
            visitor(&field.value);
        }
    }

    fn visit_strs_mut(&mut self, visitor: &mut dyn FnMut(&mut StrRef)) {
        for field in &mut self.fields {
            visitor(&mut field.name);
            visitor(&mut field.value);
        }
    }
}

crate::impl_heap_object!(MimeHdr, ObjKind::MimeHeader);

/// Creates an empty MIME header in `heap`.
pub fn mime_hdr_create(heap: &mut HdrHeap) -> ObjHandle<MimeHdr> {
    heap.allocate_obj(MimeHdr::default())
}

/// Appends a field and returns its position.
///
/// # Errors
///
/// Fails for an empty name, a foreign or stale handle, or a read-only heap.
pub fn field_attach(
    heap: &mut HdrHeap,
    hdr: ObjHandle<MimeHdr>,
    name: &[u8],
    value: StrValue<'_>,
) -> Result<usize> {
    if name.is_empty() {
        return Err(Violation::EmptyFieldName.into());
    }
    let fields = &mut heap.get_mut(hdr)?.fields;
    let index = fields.len();
    fields.push(MimeField::default());

    heap.set_str(hdr, move |h: &mut MimeHdr| &mut h.fields[index].name, StrValue::Copy(name))?;
    heap.set_str(hdr, move |h: &mut MimeHdr| &mut h.fields[index].value, value)?;
    Ok(index)
}

/// Position of the first field called `name`, ignoring ASCII case.
///
/// # Errors
///
/// Fails for a foreign or stale handle, or a dangling field name.
pub fn field_find(heap: &HdrHeap, hdr: ObjHandle<MimeHdr>, name: &[u8]) -> Result<Option<usize>> {
    for (index, field) in heap.get(hdr)?.fields.iter().enumerate() {
        if heap.resolve_checked(&field.name)?.eq_ignore_ascii_case(name) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Value of the first field called `name`.
///
/// # Errors
///
/// As for [`field_find`].
pub fn field_value_get<'a>(
    heap: &'a HdrHeap,
    hdr: ObjHandle<MimeHdr>,
    name: &[u8],
) -> Result<Option<&'a [u8]>> {
    let Some(index) = field_find(heap, hdr, name)? else {
        return Ok(None);
    };
    let field = &heap.get(hdr)?.fields[index];
    heap.resolve_checked(&field.value).map(Some)
}

/// Sets the value of the first field called `name`, attaching the field if
/// the header has none.
///
/// # Errors
///
/// As for [`field_attach`].
pub fn field_value_set(
    heap: &mut HdrHeap,
    hdr: ObjHandle<MimeHdr>,
    name: &[u8],
    value: StrValue<'_>,
) -> Result<()> {
    match field_find(heap, hdr, name)? {
        Some(index) => heap.set_str(hdr, move |h: &mut MimeHdr| &mut h.fields[index].value, value),
        None => field_attach(heap, hdr, name, value).map(drop),
    }
}

/// Removes every field called `name` and returns how many were removed.
/// Their copied strings become lost space.
///
/// # Errors
///
/// Fails for a foreign or stale handle, or on a read-only heap.
pub fn field_delete(heap: &mut HdrHeap, hdr: ObjHandle<MimeHdr>, name: &[u8]) -> Result<usize> {
    let mut doomed = Vec::new();
    for (index, field) in heap.get(hdr)?.fields.iter().enumerate() {
        if heap.resolve(&field.name).is_some_and(|n| n.eq_ignore_ascii_case(name)) {
            doomed.push(index);
        }
    }

    let fields = &mut heap.get_mut(hdr)?.fields;
    let removed: Vec<MimeField> = doomed.iter().rev().map(|&i| fields.remove(i)).collect();
    for field in &removed {
        heap.free_string(&field.name);
        heap.free_string(&field.value);
    }
    Ok(removed.len())
}

/// Prints the header as `Name: value\r\n` lines.
///
/// # Errors
///
/// Fails for a foreign or stale handle, or a dangling field.
pub fn mime_hdr_print(heap: &HdrHeap, hdr: ObjHandle<MimeHdr>) -> Result<String> {
    let mut out = Vec::new();
    for field in &heap.get(hdr)?.fields {
        out.extend_from_slice(heap.resolve_checked(&field.name)?);
        out.extend_from_slice(b": ");
        out.extend_from_slice(heap.resolve_checked(&field.value)?);
        out.extend_from_slice(b"\r\n");
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}
