use std::collections::HashMap;

use crate::column_family::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, DEFAULT_COLUMN_FAMILY_NAME,
};

/// Reconcile `requested` numbered families against descriptors that already
/// exist (from disk or an options file).
///
/// The result always holds exactly `requested + 1` descriptors: `"0"` to
/// `"{requested - 1}"` in order, then `"default"`. Numbered families that
/// exist keep their options; missing ones copy the default family's options
/// (or `template` when no default exists yet). Anything else in `existing`
/// is left out.
pub fn resolve_column_families(
    existing: &[ColumnFamilyDescriptor],
    requested: usize,
    template: &ColumnFamilyOptions,
) -> Vec<ColumnFamilyDescriptor> {
    let mut by_name: HashMap<&str, &ColumnFamilyDescriptor> =
        existing.iter().map(|d| (d.name.as_str(), d)).collect();

    let default = match by_name.remove(DEFAULT_COLUMN_FAMILY_NAME) {
        Some(found) => found.clone(),
        None => ColumnFamilyDescriptor::new(DEFAULT_COLUMN_FAMILY_NAME, template.clone()),
    };

    let mut resolved: Vec<ColumnFamilyDescriptor> = (0..requested)
        .map(|i| {
            let name = i.to_string();
            match by_name.get(name.as_str()) {
                Some(found) => (*found).clone(),
                None => ColumnFamilyDescriptor::new(name, default.options.clone()),
            }
        })
        .collect();
    resolved.push(default);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType;

    fn names(descriptors: &[ColumnFamilyDescriptor]) -> Vec<&str> {
        descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_fresh_database() {
        let resolved = resolve_column_families(&[], 3, &ColumnFamilyOptions::default());
        assert_eq!(names(&resolved), vec!["0", "1", "2", "default"]);
    }

    #[test]
    fn test_zero_families_is_default_only() {
        let resolved = resolve_column_families(&[], 0, &ColumnFamilyOptions::default());
        assert_eq!(names(&resolved), vec!["default"]);
    }

    #[test]
    fn test_existing_options_preserved_and_extras_dropped() {
        let snappy = ColumnFamilyOptions {
            compression: CompressionType::Snappy,
            ..Default::default()
        };
        let wide = ColumnFamilyOptions {
            block_size: 64 * 1024,
            ..Default::default()
        };
        let existing = vec![
            ColumnFamilyDescriptor::new("default", snappy.clone()),
            ColumnFamilyDescriptor::new("1", wide.clone()),
            ColumnFamilyDescriptor::new("7", ColumnFamilyOptions::default()),
            ColumnFamilyDescriptor::new("users", ColumnFamilyOptions::default()),
        ];

        let resolved = resolve_column_families(&existing, 2, &ColumnFamilyOptions::default());
        assert_eq!(names(&resolved), vec!["0", "1", "default"]);
        // "0" is synthesized from the default's options
        assert_eq!(resolved[0].options, snappy);
        assert_eq!(resolved[1].options, wide);
        assert_eq!(resolved[2].options, snappy);
    }

    #[test]
    fn test_deterministic() {
        let existing = vec![ColumnFamilyDescriptor::new("0", ColumnFamilyOptions::default())];
        let template = ColumnFamilyOptions::default();
        assert_eq!(
            resolve_column_families(&existing, 4, &template),
            resolve_column_families(&existing, 4, &template)
        );
    }
}
