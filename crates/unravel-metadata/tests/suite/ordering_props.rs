use proptest::prelude::*;
use std::collections::BTreeSet;
use unravel_core::NodeRef;
use unravel_metadata::{Annotation, CodeMetadata, CodeMetadataBuilder, MetadataError};

const PROPTEST_CASES: u32 = 256;

fn annotation_for(offset: u32) -> Annotation {
    match offset % 3 {
        0 => Annotation::Declaration(NodeRef::method("p/Cls", format!("m{offset}()V"))),
        1 => Annotation::Reference(NodeRef::class(format!("p/Ref{offset}"))),
        _ => Annotation::InsnOffset(offset * 2),
    }
}

fn arb_offsets() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(0u32..5_000, 0..64)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn all_annotations_is_sorted_and_complete(offsets in arb_offsets()) {
        let md = CodeMetadata::from_annotations(
            offsets.iter().map(|&o| (o, annotation_for(o))),
        ).unwrap();

        let mut expected = offsets.clone();
        expected.sort_unstable();
        let actual: Vec<u32> = md.all_annotations().iter().map(|(o, _)| *o).collect();
        prop_assert_eq!(&actual, &expected);
        for (offset, ann) in md.all_annotations() {
            prop_assert_eq!(ann, &annotation_for(*offset));
        }
    }

    #[test]
    fn at_or_below_returns_greatest_offset_not_above(
        offsets in arb_offsets(),
        probe in 0u32..6_000,
    ) {
        let md = CodeMetadata::from_annotations(
            offsets.iter().map(|&o| (o, annotation_for(o))),
        ).unwrap();
        let set: BTreeSet<u32> = offsets.iter().copied().collect();

        let expected = set.range(..=probe).next_back().copied();
        let actual = md.annotation_at_or_below(probe).map(|(o, _)| o);
        prop_assert_eq!(actual, expected);

        if let Some(offset) = actual {
            prop_assert_eq!(
                md.annotation_at_or_below(probe).map(|(_, ann)| ann.clone()),
                Some(annotation_for(offset))
            );
        }
        prop_assert_eq!(md.annotation_at(probe).is_some(), set.contains(&probe));
    }

    #[test]
    fn any_repeated_offset_fails_the_build(offsets in arb_offsets(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!offsets.is_empty());
        let dup = offsets[pick.index(offsets.len())];

        let mut builder = CodeMetadataBuilder::new();
        for &offset in &offsets {
            builder.add(offset, annotation_for(offset)).unwrap();
        }
        prop_assert_eq!(
            builder.add(dup, Annotation::InsnOffset(0)),
            Err(MetadataError::DuplicateOffset { offset: dup })
        );
    }
}
