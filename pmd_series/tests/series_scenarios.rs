//! End-to-end scenarios through the JSON/TOML reference backend.

use pmd_series::{Access, Attributable, Dataset, Datatype, Series};

fn scratch(name: &str) -> (tempfile::TempDir, String) {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let path = format!("{}/{name}", dir.path().display());
    (dir, path)
}

#[test]
fn file_based_write_then_read() {
    let (dir, path) = scratch("data_%T.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        series.set_author("test suite <noreply@example.org>");

        let it100 = series.iteration(100);
        let e_x = it100.meshes().unwrap().get("E").component("x").unwrap();
        e_x.reset_dataset(Dataset::new(Datatype::Long, vec![5])).unwrap();
        e_x.store_chunk(vec![0i64, 1, 2, 3, 4], vec![0], vec![5])
            .unwrap();

        let it200 = series.iteration(200);
        let position_x = it200
            .particles()
            .unwrap()
            .get("e")
            .record("position")
            .component("x")
            .unwrap();
        position_x
            .reset_dataset(Dataset::new(Datatype::Double, vec![3]))
            .unwrap();
        position_x
            .store_chunk(vec![0.5f64, 1.5, 2.5], vec![0], vec![3])
            .unwrap();

        series.close().unwrap();
    }

    assert!(dir.path().join("data_100.json").is_file());
    assert!(dir.path().join("data_200.json").is_file());

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    assert_eq!(series.iterations().keys(), vec![100, 200]);
    assert_eq!(series.open_pmd(), "1.1.0");
    assert_eq!(
        series.author().as_deref(),
        Some("test suite <noreply@example.org>")
    );

    let it100 = series.iteration(100);
    let e_x = it100.meshes().unwrap().get("E").component("x").unwrap();
    assert_eq!(e_x.datatype(), Datatype::Long);
    assert_eq!(e_x.extent(), vec![5]);
    let loaded = e_x.load_chunk::<i64>(vec![0], vec![5]).unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), vec![0, 1, 2, 3, 4]);

    let it200 = series.iteration(200);
    let position_x = it200
        .particles()
        .unwrap()
        .get("e")
        .record("position")
        .component("x")
        .unwrap();
    let loaded = position_x.load_chunk::<f64>(vec![0], vec![3]).unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), vec![0.5, 1.5, 2.5]);

    // a sub-slab of a stored chunk reads the corresponding slice
    let middle = e_x.load_chunk::<i64>(vec![1], vec![3]).unwrap();
    series.flush().unwrap();
    assert_eq!(middle.get().unwrap(), vec![1, 2, 3]);
}

#[test]
fn close_reopen_amend() {
    let (_dir, path) = scratch("amend_%T.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let it = series.iteration(0);
        let e_x = it.meshes().unwrap().get("E").component("x").unwrap();
        e_x.reset_dataset(Dataset::new(Datatype::Long, vec![5])).unwrap();
        e_x.store_chunk((0..5i64).collect(), vec![0], vec![5]).unwrap();
        it.close().unwrap();
        series.flush().unwrap();

        it.open().unwrap();
        let b_y = it.meshes().unwrap().get("B").component("y").unwrap();
        b_y.reset_dataset(Dataset::new(Datatype::Long, vec![5])).unwrap();
        b_y.store_chunk((0..5i64).collect(), vec![0], vec![5]).unwrap();
        it.close().unwrap();
        series.close().unwrap();
    }

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    let meshes = series.iteration(0).meshes().unwrap();
    assert!(meshes.contains("E"));
    assert!(meshes.contains("B"));
    for mesh in ["E", "B"] {
        let key = if mesh == "E" { "x" } else { "y" };
        let component = meshes.get(mesh).component(key).unwrap();
        let loaded = component.load_chunk::<i64>(vec![0], vec![5]).unwrap();
        series.flush().unwrap();
        assert_eq!(loaded.get().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}

#[test]
fn group_based_attribute_amendment() {
    let (dir, path) = scratch("group.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        for index in [1u64, 2] {
            let it = series.iteration(index);
            let rho = it.meshes().unwrap().get("rho").scalar_component().unwrap();
            rho.reset_dataset(Dataset::new(Datatype::Double, vec![2])).unwrap();
            rho.store_chunk(vec![1.0, 2.0], vec![0], vec![2]).unwrap();
        }
        let it2 = series.iteration(2);
        it2.close().unwrap();
        series.flush().unwrap();
        it2.open().unwrap();
        it2.set_time_unit_si(2.0).unwrap();
        it2.close().unwrap();
        series.close().unwrap();
    }
    assert!(dir.path().join("group.json").is_file());

    let series = Series::new(&path, Access::ReadRandomAccess).unwrap();
    assert_eq!(series.iterations().len(), 2);
    let time_unit_si = series.iteration(2).time_unit_si().unwrap();
    // either attribute version is valid under random access
    assert!(time_unit_si == 2.0 || time_unit_si == 1.0);
}

#[test]
fn constant_and_empty_components_round_trip() {
    let (_dir, path) = scratch("const.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let it = series.iteration(0);
        let meshes = it.meshes().unwrap();

        let filled = meshes.get("filled").scalar_component().unwrap();
        filled
            .reset_dataset(Dataset::new(Datatype::Double, vec![2, 3]))
            .unwrap();
        filled.make_constant(4.25f64).unwrap();

        let empty = meshes.get("empty").scalar_component().unwrap();
        empty.make_empty(Datatype::Long, 2).unwrap();

        series.close().unwrap();
    }

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    let meshes = series.iteration(0).meshes().unwrap();

    let filled = meshes.get("filled").scalar_component().unwrap();
    assert!(filled.constant());
    assert_eq!(filled.extent(), vec![2, 3]);
    // any slab within the extent yields the constant, without any backend
    // involvement
    let loaded = filled.load_chunk::<f64>(vec![1, 1], vec![1, 2]).unwrap();
    assert_eq!(loaded.get().unwrap(), vec![4.25, 4.25]);

    let empty = meshes.get("empty").scalar_component().unwrap();
    assert!(empty.empty());
    assert_eq!(empty.extent(), vec![0, 0]);
    let loaded = empty.load_chunk::<i64>(vec![0, 0], vec![0, 0]).unwrap();
    assert_eq!(loaded.get().unwrap(), Vec::<i64>::new());
}

#[test]
fn flushed_nodes_are_written_and_clean() {
    let (_dir, path) = scratch("flags_%T.json");
    let series = Series::new(&path, Access::Create).unwrap();
    let it = series.iteration(1);
    let component = it.meshes().unwrap().get("E").component("x").unwrap();
    component
        .reset_dataset(Dataset::new(Datatype::Double, vec![4]))
        .unwrap();
    component
        .store_chunk(vec![0.0, 1.0, 2.0, 3.0], vec![0], vec![4])
        .unwrap();

    assert!(component.dirty());
    assert!(!component.written());

    series.flush().unwrap();

    assert!(component.written());
    assert!(!component.dirty());
    assert!(it.written());
    assert!(!it.dirty());
}

#[test]
fn reparse_is_idempotent() {
    let (_dir, path) = scratch("stable.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let it = series.iteration(3);
        it.set_time(1.5).unwrap();
        it.set_dt(0.5).unwrap();
        let rho = it.meshes().unwrap().get("rho").scalar_component().unwrap();
        rho.reset_dataset(Dataset::new(Datatype::Double, vec![4])).unwrap();
        rho.store_chunk(vec![1.0; 4], vec![0], vec![4]).unwrap();
        series.close().unwrap();
    }

    let observe = |series: &Series| {
        let it = series.iteration(3);
        let rho = it.meshes().unwrap().get("rho").scalar_component().unwrap();
        (
            it.time().unwrap(),
            it.dt().unwrap(),
            rho.datatype(),
            rho.extent(),
            series.open_pmd(),
        )
    };

    let first = Series::new(&path, Access::ReadWrite).unwrap();
    let before = observe(&first);
    // flush without modifications, then reopen
    first.flush().unwrap();
    drop(first);

    let second = Series::new(&path, Access::ReadOnly).unwrap();
    assert_eq!(observe(&second), before);
}

#[test]
fn deleted_attributes_stay_deleted() {
    let (_dir, path) = scratch("attrs.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let it = series.iteration(0);
        it.meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap()
            .reset_dataset(Dataset::new(Datatype::Double, vec![1]))
            .unwrap();
        it.set_attribute("note", "temporary").unwrap();
        series.flush().unwrap();

        assert!(it.delete_attribute("note").unwrap());
        assert_eq!(it.get_attribute("note"), None);
        series.close().unwrap();
    }

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    let it = series.iteration(0);
    it.open().unwrap();
    assert_eq!(it.get_attribute("note"), None);
}

#[test]
fn finished_read_iterations_release_their_file() {
    let (_dir, path) = scratch("release_%T.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let rho = series
            .iteration(10)
            .meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap();
        rho.reset_dataset(Dataset::new(Datatype::Double, vec![2])).unwrap();
        rho.store_chunk(vec![1.0, 2.0], vec![0], vec![2]).unwrap();
        series.close().unwrap();
    }

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    let it = series.iteration(10);
    let rho = it.meshes().unwrap().get("rho").scalar_component().unwrap();
    let loaded = rho.load_chunk::<f64>(vec![0], vec![2]).unwrap();
    it.close().unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), vec![1.0, 2.0]);
    // the iteration's file is released, but a random-access reader may
    // come back to it
    assert_eq!(
        it.close_status(),
        pmd_series::CloseStatus::ClosedTemporarily
    );

    it.open().unwrap();
    assert_eq!(it.close_status(), pmd_series::CloseStatus::Open);
    let again = rho.load_chunk::<f64>(vec![0], vec![2]).unwrap();
    series.flush().unwrap();
    assert_eq!(again.get().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn deferred_parsing_runs_on_first_access() {
    let (_dir, path) = scratch("deferred_%T.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let it = series.iteration(5);
        it.set_time(9.0).unwrap();
        it.meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap()
            .reset_dataset(Dataset::new(Datatype::Double, vec![1]))
            .unwrap();
        series.close().unwrap();
    }

    let series = Series::with_options(
        &path,
        Access::ReadOnly,
        r#"{"defer_iteration_parsing": true}"#,
    )
    .unwrap();
    let it = series.iteration(5);
    assert_eq!(
        it.close_status(),
        pmd_series::CloseStatus::ParseAccessDeferred
    );
    // the first attribute read triggers the parse
    assert_eq!(it.time().unwrap(), 9.0);
    assert_eq!(it.close_status(), pmd_series::CloseStatus::Open);
    assert!(it.meshes().unwrap().contains("rho"));
}

#[test]
fn toml_flavor_round_trips() {
    let (dir, path) = scratch("series.toml");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let rho = series
            .iteration(1)
            .meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap();
        rho.reset_dataset(Dataset::new(Datatype::Long, vec![3])).unwrap();
        rho.store_chunk(vec![7i64, 8, 9], vec![0], vec![3]).unwrap();
        series.close().unwrap();
    }
    assert!(dir.path().join("series.toml").is_file());

    let series = Series::new(&path, Access::ReadOnly).unwrap();
    assert_eq!(series.backend_name(), "TOML");
    let rho = series
        .iteration(1)
        .meshes()
        .unwrap()
        .get("rho")
        .scalar_component()
        .unwrap();
    let loaded = rho.load_chunk::<i64>(vec![0], vec![3]).unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), vec![7, 8, 9]);
}

#[test]
fn extension_autodetection_on_read() {
    let (_dir, path) = scratch("auto_%T.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        series
            .iteration(4)
            .meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap()
            .reset_dataset(Dataset::new(Datatype::Double, vec![1]))
            .unwrap();
        series.close().unwrap();
    }

    let auto_path = path.replace(".json", ".%E");
    let series = Series::new(&auto_path, Access::ReadOnly).unwrap();
    assert_eq!(series.backend_name(), "JSON");
    assert_eq!(series.iterations().keys(), vec![4]);
}

#[test]
fn dataset_patterns_resolve_per_path() {
    let (_dir, path) = scratch("patterns.json");
    let series = Series::with_options(
        &path,
        Access::Create,
        r#"{"json": {"dataset": [
            {"select": ".*meshes.*", "cfg": {"mode": "mesh"}},
            {"cfg": {"mode": "default"}}
        ]}}"#,
    )
    .unwrap();
    assert_eq!(
        series.dataset_config("/data/1/meshes/E/x")["json"]["dataset"]["mode"],
        serde_json::json!("mesh")
    );
    assert_eq!(
        series.dataset_config("/data/1/particles/e/w")["json"]["dataset"]["mode"],
        serde_json::json!("default")
    );
}

#[test]
fn growing_a_written_dataset() {
    let (_dir, path) = scratch("grow.json");
    {
        let series = Series::new(&path, Access::Create).unwrap();
        let rho = series
            .iteration(0)
            .meshes()
            .unwrap()
            .get("rho")
            .scalar_component()
            .unwrap();
        rho.reset_dataset(Dataset::new(Datatype::Long, vec![2])).unwrap();
        rho.store_chunk(vec![1i64, 2], vec![0], vec![2]).unwrap();
        series.flush().unwrap();

        // extents may only grow once written
        assert!(rho.reset_dataset(Dataset::new(Datatype::Long, vec![1])).is_err());
        rho.reset_dataset(Dataset::new(Datatype::Long, vec![4])).unwrap();
        rho.store_chunk(vec![3i64, 4], vec![2], vec![2]).unwrap();
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
    assert_eq!(rho.extent(), vec![4]);
    let loaded = rho.load_chunk::<i64>(vec![0], vec![4]).unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), vec![1, 2, 3, 4]);
}
