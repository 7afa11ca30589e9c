//! Planning parallel reads from the chunks a series reports.

use chunk_assignment::{
    BinPacking, ByCuboidSlice, OneDimensionalBlockSlicer, RankMeta, Strategy,
};
use pmd_series::{Access, Dataset, Datatype, Series};

fn ranks(n: u32) -> RankMeta {
    (0..n).map(|r| (r, format!("host{r}"))).collect()
}

#[test]
fn available_chunks_feed_the_planner() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let path = format!("{}/plan.json", dir.path().display());
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let rho = series
            .iteration(0)
            .meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap();
        rho.reset_dataset(Dataset::new(Datatype::Double, vec![10])).unwrap();
        rho.store_chunk(vec![0.0; 10], vec![0], vec![10]).unwrap();
        series.close().unwrap();
    }

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    let rho = series
        .iteration(0)
        .meshes()
        .unwrap()
        .get("rho")
        .scalar_component()
        .unwrap();
    let table = rho.available_chunks().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].extent, vec![10]);

    // two readers slice the reported chunk along dimension 0
    for rank in 0..2 {
        let strategy = ByCuboidSlice::new(
            Box::new(OneDimensionalBlockSlicer::new(0)),
            vec![10],
            rank,
            2,
        );
        let plan = strategy
            .assign_table(table.clone(), &ranks(1), &ranks(2))
            .unwrap();
        let mine = &plan[&rank];
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].extent, vec![5]);
        assert_eq!(mine[0].offset, vec![5 * u64::from(rank)]);

        // the plan names loadable slabs
        let loaded = rho
            .load_chunk::<f64>(mine[0].offset.clone(), mine[0].extent.clone())
            .unwrap();
        series.flush().unwrap();
        assert_eq!(loaded.get().unwrap().len(), 5);
    }

    // bin packing over the same table assigns every point exactly once
    let plan = BinPacking::new(0)
        .assign_table(table, &ranks(1), &ranks(3))
        .unwrap();
    let total: u64 = plan
        .values()
        .flatten()
        .map(pmd_series::WrittenChunkInfo::num_points)
        .sum();
    assert_eq!(total, 10);
}
