use keel_ast::Span;

use crate::diagnostics::{Diagnostic, ErrorKind};
use crate::types::{FieldLayout, StructId, StructLayout, Type, TypeTable, round_up};

pub(crate) struct FieldInput {
    pub name: String,
    pub ty: Type,
}

/// Lay out fields in declaration order. Field types embedded by value must
/// already have their layout in `types`.
pub(crate) fn compute_layout(
    types: &TypeTable,
    id: StructId,
    name: &str,
    span: Span,
    packed: bool,
    fields: Vec<FieldInput>,
    explicit_align: Option<(u64, Span)>,
) -> (StructLayout, Option<Diagnostic>) {
    let mut offset = 0u64;
    let mut natural = 1u64;
    let mut widest: Option<String> = None;
    let mut laid_out = Vec::with_capacity(fields.len());

    for field in fields {
        let (size, align) = types.size_align(&field.ty);
        let field_align = if packed { 1 } else { align };
        if field_align > natural {
            natural = field_align;
            widest = Some(field.name.clone());
        }
        offset = round_up(offset, field_align);
        laid_out.push(FieldLayout {
            name: field.name,
            ty: field.ty,
            offset,
        });
        offset = offset.saturating_add(size);
    }

    let mut align = natural;
    let mut conflict = None;
    if let Some((requested, at)) = explicit_align {
        if !requested.is_power_of_two() {
            conflict = Some(Diagnostic::new(
                ErrorKind::LayoutConflict,
                at,
                format!("align({requested}) on struct '{name}' is not a power of two"),
            ));
        } else if requested < natural {
            let field = widest.as_deref().unwrap_or("?");
            conflict = Some(
                Diagnostic::new(
                    ErrorKind::LayoutConflict,
                    at,
                    format!(
                        "align({requested}) on struct '{name}' is below the natural alignment {natural} of field '{field}'"
                    ),
                )
                .with_help(format!("use align({natural}) or larger, or mark the struct packed")),
            );
        } else {
            align = requested;
        }
    }

    let layout = StructLayout {
        id,
        name: name.to_string(),
        span,
        fields: laid_out,
        packed,
        explicit_align: explicit_align.map(|(n, _)| n),
        size: round_up(offset, align),
        align,
    };
    (layout, conflict)
}
