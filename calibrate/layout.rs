//! # Form Layouts
//!
//! A form is an ordered answer key. Most forms are a plain sequence of items; the
//! foreign-language area additionally carries two mutually exclusive blocks (English
//! and Spanish) sharing the same positions. Each form is resolved here, once, into a
//! [`FormLayout`] whose slots already know their matrix column and their offset in the
//! raw answer/key strings, so scoring an examinee never branches on area codes.
//!
//! String order of a form: ascending position; where the variant block begins the
//! whole first block is laid out, then the whole second block, then the remaining
//! fixed positions. This is how the answer strings of the microdata are encoded.

use ahash::AHashMap;
use std::collections::BTreeMap;
use thiserror::Error;

pub type FormId = i64;
pub type ItemId = i64;

/// Foreign-language option chosen by an examinee, and carried by variant items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LanguageOption {
    English,
    Spanish,
}

impl LanguageOption {
    /// Decodes the `TP_LINGUA` convention: 0 = English, 1 = Spanish.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::English),
            1 => Some(Self::Spanish),
            _ => None,
        }
    }
}

/// One row of the items table: item `item` sits at `position` of form `form`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemPlacement {
    pub form: FormId,
    pub position: u32,
    pub item: ItemId,
    pub language: Option<LanguageOption>,
}

/// A resolved slot: where to read the answer, and which matrix column it scores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub column: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormLayout {
    Standard {
        slots: Vec<Slot>,
    },
    Variant {
        fixed: Vec<Slot>,
        english: Vec<Slot>,
        spanish: Vec<Slot>,
    },
}

/// Reasons an examinee row cannot be resolved against its form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("form {0} has language-variant items but the examinee has no valid language choice")]
    MissingLanguageChoice(FormId),
}

impl FormLayout {
    /// Number of characters an answer (and key) string must have for this form.
    pub fn string_len(&self) -> usize {
        match self {
            Self::Standard { slots } => slots.len(),
            Self::Variant {
                fixed,
                english,
                spanish,
            } => fixed.len() + english.len() + spanish.len(),
        }
    }

    pub fn is_variant(&self) -> bool {
        matches!(self, Self::Variant { .. })
    }

    /// The effective slot set for an examinee: the fixed slots plus, on a variant form,
    /// exactly the block matching `choice`. The language is ignored on standard forms.
    pub fn active_slots(
        &self,
        form: FormId,
        choice: Option<LanguageOption>,
    ) -> Result<[&[Slot]; 2], SlotError> {
        match self {
            Self::Standard { slots } => Ok([slots.as_slice(), &[]]),
            Self::Variant {
                fixed,
                english,
                spanish,
            } => match choice {
                Some(LanguageOption::English) => Ok([fixed.as_slice(), english.as_slice()]),
                Some(LanguageOption::Spanish) => Ok([fixed.as_slice(), spanish.as_slice()]),
                None => Err(SlotError::MissingLanguageChoice(form)),
            },
        }
    }
}

/// Bijection between item identifiers and matrix columns, ordered by item id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemIndex {
    ids: Vec<ItemId>,
    columns: AHashMap<ItemId, usize>,
}

impl ItemIndex {
    pub fn from_ids(ids: impl IntoIterator<Item = ItemId>) -> Self {
        let mut ids: Vec<ItemId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let columns = ids.iter().enumerate().map(|(col, &id)| (id, col)).collect();
        Self { ids, columns }
    }

    pub fn column(&self, item: ItemId) -> Option<usize> {
        self.columns.get(&item).copied()
    }

    pub fn item_id(&self, column: usize) -> ItemId {
        self.ids[column]
    }

    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("The items table contains no rows for this area; no form layout can be built.")]
    NoItems,
    #[error("Form {form} places more than one item at position {position}.")]
    DuplicatePosition { form: FormId, position: u32 },
    #[error("Form {form} lists item {item} more than once.")]
    DuplicateItem { form: FormId, item: ItemId },
    #[error(
        "Form {form} mixes language-variant and fixed items at position {position}."
    )]
    MixedPosition { form: FormId, position: u32 },
    #[error(
        "Form {form} has language blocks that do not cover the same positions (English: {english}, Spanish: {spanish})."
    )]
    MisalignedVariantBlocks {
        form: FormId,
        english: usize,
        spanish: usize,
    },
    #[error("Form {form} interleaves fixed items inside its language-variant block.")]
    VariantBlockNotContiguous { form: FormId },
}

/// Every form of one knowledge area, sharing one item index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AreaLayout {
    items: ItemIndex,
    forms: BTreeMap<FormId, FormLayout>,
}

impl AreaLayout {
    pub fn from_placements(placements: &[ItemPlacement]) -> Result<Self, LayoutError> {
        if placements.is_empty() {
            return Err(LayoutError::NoItems);
        }

        let items = ItemIndex::from_ids(placements.iter().map(|p| p.item));

        let mut by_form: BTreeMap<FormId, BTreeMap<u32, Vec<&ItemPlacement>>> = BTreeMap::new();
        for placement in placements {
            by_form
                .entry(placement.form)
                .or_default()
                .entry(placement.position)
                .or_default()
                .push(placement);
        }

        let mut forms = BTreeMap::new();
        for (form, positions) in &by_form {
            let layout = internal::resolve_form(*form, positions, &items)?;
            forms.insert(*form, layout);
        }

        log::debug!(
            "Resolved {} forms over {} distinct items",
            forms.len(),
            items.len()
        );

        Ok(Self { items, forms })
    }

    pub fn items(&self) -> &ItemIndex {
        &self.items
    }

    pub fn form(&self, form: FormId) -> Option<&FormLayout> {
        self.forms.get(&form)
    }

    pub fn forms(&self) -> impl Iterator<Item = (FormId, &FormLayout)> {
        self.forms.iter().map(|(&id, layout)| (id, layout))
    }

    pub fn has_variants(&self) -> bool {
        self.forms.values().any(FormLayout::is_variant)
    }
}

mod internal {
    use super::*;
    use std::collections::HashSet;

    pub(super) fn resolve_form(
        form: FormId,
        positions: &BTreeMap<u32, Vec<&ItemPlacement>>,
        items: &ItemIndex,
    ) -> Result<FormLayout, LayoutError> {
        let mut seen_items = HashSet::new();
        for placement in positions.values().flatten() {
            if !seen_items.insert(placement.item) {
                return Err(LayoutError::DuplicateItem {
                    form,
                    item: placement.item,
                });
            }
        }

        // The index was built from these same placements, so the lookup is total.
        let column_of = |p: &ItemPlacement| items.columns[&p.item];

        let is_variant = positions
            .values()
            .flatten()
            .any(|p| p.language.is_some());

        if !is_variant {
            let mut slots = Vec::with_capacity(positions.len());
            for (&position, at) in positions {
                if at.len() > 1 {
                    return Err(LayoutError::DuplicatePosition { form, position });
                }
                slots.push(Slot {
                    column: column_of(at[0]),
                    offset: slots.len(),
                });
            }
            return Ok(FormLayout::Standard { slots });
        }

        // Classify each position as fixed or as part of the variant block.
        let mut english_positions = Vec::new();
        let mut spanish_positions = Vec::new();
        let mut block_started = false;
        let mut block_closed = false;
        for (&position, at) in positions {
            let variant_count = at.iter().filter(|p| p.language.is_some()).count();
            if variant_count == 0 {
                if at.len() > 1 {
                    return Err(LayoutError::DuplicatePosition { form, position });
                }
                if block_started {
                    block_closed = true;
                }
                continue;
            }
            if variant_count != at.len() {
                return Err(LayoutError::MixedPosition { form, position });
            }
            if block_closed {
                return Err(LayoutError::VariantBlockNotContiguous { form });
            }
            block_started = true;
            let mut english = 0;
            let mut spanish = 0;
            for placement in at {
                match placement.language {
                    Some(LanguageOption::English) => {
                        english += 1;
                        english_positions.push(position);
                    }
                    Some(LanguageOption::Spanish) => {
                        spanish += 1;
                        spanish_positions.push(position);
                    }
                    None => {}
                }
            }
            if english > 1 || spanish > 1 {
                return Err(LayoutError::DuplicatePosition { form, position });
            }
        }
        if english_positions != spanish_positions {
            return Err(LayoutError::MisalignedVariantBlocks {
                form,
                english: english_positions.len(),
                spanish: spanish_positions.len(),
            });
        }

        let block_len = english_positions.len();
        let mut fixed = Vec::new();
        let mut english = Vec::with_capacity(block_len);
        let mut spanish = Vec::with_capacity(block_len);
        let mut cursor = 0;
        for at in positions.values() {
            if at[0].language.is_none() {
                fixed.push(Slot {
                    column: column_of(at[0]),
                    offset: cursor,
                });
                cursor += 1;
                continue;
            }
            if english.is_empty() {
                // First variant position: lay out both blocks back to back.
                cursor += 2 * block_len;
            }
            let block_index = english.len();
            let block_start = cursor - 2 * block_len;
            for placement in at {
                match placement.language {
                    Some(LanguageOption::English) => english.push(Slot {
                        column: column_of(placement),
                        offset: block_start + block_index,
                    }),
                    Some(LanguageOption::Spanish) => spanish.push(Slot {
                        column: column_of(placement),
                        offset: block_start + block_len + block_index,
                    }),
                    None => {}
                }
            }
        }

        Ok(FormLayout::Variant {
            fixed,
            english,
            spanish,
        })
    }
}
