use catalog_core::{Catalog, HandbookMeta, LocaleText, OverlayEntity, OverlayPack, TemplateId};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::BTreeMap;

fn build_catalog(n_mounts: usize) -> Catalog {
    let mut catalog = Catalog::default();
    catalog.items.insert(
        TemplateId("BASE-1".into()),
        json!({
            "_id": "BASE-1",
            "_props": {
                "Weight": 1.2,
                "Slots": [],
                "ConflictingItems": []
            }
        }),
    );
    for i in 0..n_mounts {
        catalog.items.insert(
            TemplateId(format!("MOUNT-{i}")),
            json!({
                "_id": format!("MOUNT-{i}"),
                "_props": {
                    "Slots": [
                        {
                            "_name": "mod_scope",
                            "_props": { "filters": [ { "Filter": ["OPTIC-1", "BASE-1"] } ] }
                        }
                    ],
                    "ConflictingItems": ["BASE-1"]
                }
            }),
        );
    }
    catalog.locales.insert("en".into(), BTreeMap::new());
    catalog
}

fn build_pack() -> OverlayPack {
    let mut pack = OverlayPack::default();
    pack.items.insert(
        TemplateId("item-A".into()),
        OverlayEntity {
            enable: true,
            clone: TemplateId("BASE-1".into()),
            overrides: json!({ "_props": { "Weight": 0.5 } }),
            compatibilities: BTreeMap::new(),
            conflicts: vec![],
            handbook: HandbookMeta {
                parent_id: "cat".into(),
                price: 1000,
            },
            locales: LocaleText {
                name: "Bench item".into(),
                short_name: "BI".into(),
                description: String::new(),
            },
        },
    );
    pack
}

fn bench_pass(c: &mut Criterion) {
    let catalog0 = build_catalog(2_000);
    let pack = build_pack();
    c.bench_function("overlay pass, 2k referencing entities", |b| {
        b.iter(|| {
            let mut catalog = catalog0.clone();
            let _ = black_box(overlay_engine::apply_pack(&mut catalog, &pack));
        })
    });
}

criterion_group!(benches, bench_pass);
criterion_main!(benches);
