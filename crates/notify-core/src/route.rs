use crate::record::{ActionKind, TransactionKind, TransactionRef};

/// Deep link for a notification reference, or `None` when the reference is
/// incomplete or the transaction id is not a real row (`<= 0`).
pub fn resolve_route(reference: &TransactionRef) -> Option<String> {
    let id = reference.transaction_id.filter(|id| *id > 0)?;
    let slug = transaction_slug(reference.transaction_kind?);
    let path = match reference.action_kind? {
        ActionKind::List => format!("/app/{slug}/{id}"),
        ActionKind::Approval => format!("/app/{slug}/approvals/{id}"),
    };
    Some(path)
}

fn transaction_slug(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Far => "far",
        TransactionKind::Afr => "afr",
        TransactionKind::Hfr => "hfr",
        TransactionKind::Dfr => "dfr",
    }
}
