use url::Url;

use crate::TsuzuriResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolves `new` against `current`, keeping the query of `current` when `new` has none.
///
/// ```text
/// https://example.com/manifest.mpd?auth=secret + /video42.mp4
///     => https://example.com/video42.mp4?auth=secret
/// https://example.com/manifest.mpd?auth=old + /video42.mp4?auth=new
///     => https://example.com/video42.mp4?auth=new
/// ```
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> TsuzuriResult<Url> {
    let new = new.trim();
    if is_absolute_url(new) {
        return Ok(Url::parse(new)?);
    }

    let mut merged = current.join(new)?;
    if merged.query().is_none() {
        merged.set_query(current.query());
    }
    Ok(merged)
}

/// Applies a chain of `BaseURL` values, outermost first.
pub(crate) fn resolve_base<'a>(
    current: &Url,
    bases: impl IntoIterator<Item = Option<&'a String>>,
) -> TsuzuriResult<Url> {
    let mut url = current.clone();
    for base in bases.into_iter().flatten() {
        url = merge_baseurls(&url, base)?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_baseurls() {
        let base = Url::parse("https://example.com/dash/manifest.mpd?auth=secret").unwrap();

        assert_eq!(
            merge_baseurls(&base, "/video42.mp4").unwrap().as_str(),
            "https://example.com/video42.mp4?auth=secret"
        );
        assert_eq!(
            merge_baseurls(&base, "video42.mp4?auth=new").unwrap().as_str(),
            "https://example.com/dash/video42.mp4?auth=new"
        );
        assert_eq!(
            merge_baseurls(&base, "https://cdn.example.net/a.mp4").unwrap().as_str(),
            "https://cdn.example.net/a.mp4"
        );
    }

    #[test]
    fn test_resolve_base_chain() {
        let manifest = Url::parse("https://example.com/live/manifest.mpd").unwrap();
        let period = "p1/".to_string();
        let representation = "video/".to_string();

        let url = resolve_base(&manifest, [Some(&period), None, Some(&representation)]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/live/p1/video/");
    }
}
