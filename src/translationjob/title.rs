//! Destination-title computation shared by the reconciler's duplicate
//! pre-check (§4.5) and the worker's actual write-time resolution (§4.6).

use crate::catalogue::{Store, TargetId};
use crate::util::errors::{Error, StdError};

use super::types::{MAX_TITLE_SUFFIX_ATTEMPTS, TITLE_PREFIX_DIAGNOSTIC, TITLE_PREFIX_TRANSLATED};

pub fn prefix_for(is_diagnostic: bool) -> &'static str {
    if is_diagnostic {
        TITLE_PREFIX_DIAGNOSTIC
    } else {
        TITLE_PREFIX_TRANSLATED
    }
}

pub fn base_title(prefix: &str, title: &str) -> String {
    format!("{prefix}--> {title}")
}

/// Destination title for a diagnostic job: diagnostics never suffix, they
/// always target the same title so the write step can update-in-place.
pub fn diagnostic_title(title: &str) -> String {
    base_title(TITLE_PREFIX_DIAGNOSTIC, title)
}

/// Finds a unique destination title, appending `" (N)"` on collision up to
/// `MAX_TITLE_SUFFIX_ATTEMPTS`.
pub async fn unique_title(
    prefix: &str,
    title: &str,
    catalogue: &Store,
    destination_id: &TargetId,
) -> Result<String, Error> {
    let base = base_title(prefix, title);
    if !catalogue.has_title(destination_id, &base).await {
        return Ok(base);
    }
    for n in 2..=MAX_TITLE_SUFFIX_ATTEMPTS {
        let candidate = format!("{base} ({n})");
        if !catalogue.has_title(destination_id, &candidate).await {
            return Ok(candidate);
        }
    }
    Err(Error::StdError(StdError::Semantic(format!(
        "could not find a unique title for {base} after {MAX_TITLE_SUFFIX_ATTEMPTS} attempts"
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Page, TargetMeta};
    use crate::wikitarget::types::WikiTargetMode;

    fn meta(id: &TargetId) -> TargetMeta {
        TargetMeta {
            id: id.clone(),
            mode: WikiTargetMode::ReadWrite,
            uri: "https://w.example".into(),
        }
    }

    fn page(id: &str, title: &str) -> Page {
        Page {
            id: id.into(),
            title: title.into(),
            slug: title.to_lowercase(),
            updated_at: String::new(),
            language: None,
            has_assets: false,
            collection: None,
            is_draft: false,
            is_template: false,
        }
    }

    #[tokio::test]
    async fn first_write_gets_the_base_title() {
        let store = Store::new();
        let id = TargetId::new("ns", "dest");
        let title = unique_title(TITLE_PREFIX_TRANSLATED, "A", &store, &id).await.unwrap();
        assert_eq!(title, "AUTOTRANSLATED--> A");
    }

    #[tokio::test]
    async fn collision_appends_suffix() {
        let store = Store::new();
        let id = TargetId::new("ns", "dest");
        store
            .update(id.clone(), meta(&id), vec![page("d1", "AUTOTRANSLATED--> A")])
            .await;
        let title = unique_title(TITLE_PREFIX_TRANSLATED, "A", &store, &id).await.unwrap();
        assert_eq!(title, "AUTOTRANSLATED--> A (2)");
    }

    #[tokio::test]
    async fn terminates_at_max_attempts() {
        let store = Store::new();
        let id = TargetId::new("ns", "dest");
        let mut pages = vec![page("base", "AUTOTRANSLATED--> A")];
        for n in 2..=MAX_TITLE_SUFFIX_ATTEMPTS {
            pages.push(page(&format!("p{n}"), &format!("AUTOTRANSLATED--> A ({n})")));
        }
        store.update(id.clone(), meta(&id), pages).await;
        assert!(unique_title(TITLE_PREFIX_TRANSLATED, "A", &store, &id).await.is_err());
    }

    #[test]
    fn diagnostic_title_never_suffixes() {
        assert_eq!(diagnostic_title("Star Wars"), "AUTODIAG--> Star Wars");
    }
}
