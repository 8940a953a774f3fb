use approx::assert_relative_eq;
use bop_rs::{Error, NeighborMethod, Structure, System, make_crystal};
use std::io::Write;

#[test]
fn test_system_round_trip_through_dump() {
    let (atoms, cell) = make_crystal(Structure::Bcc, 2.87, [2, 2, 2]).unwrap();
    let mut sys = System::new();
    sys.assign_atoms(atoms, cell).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bcc.dump");
    sys.write_outputfile(&path).unwrap();

    let mut loaded = System::new();
    loaded.read_inputfile(&path).unwrap();

    assert_eq!(loaded.n_atoms(), sys.n_atoms());
    assert_relative_eq!(
        loaded.cell().unwrap().volume(),
        sys.cell().unwrap().volume(),
        epsilon = 1e-9
    );
    for (a, b) in loaded.atoms().iter().zip(sys.atoms()) {
        assert_eq!(a.id(), b.id());
        assert_eq!(a.atom_type(), b.atom_type());
        assert_relative_eq!(*a.position(), *b.position(), epsilon = 1e-12);
    }

    loaded.find_neighbors(NeighborMethod::Voronoi).unwrap();
    assert_eq!(loaded.atom(0).unwrap().voronoi_vector(), Some([0, 6, 0, 8]));
}

#[test]
fn test_read_unwrapped_coordinates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "ITEM: TIMESTEP\n100\nITEM: NUMBER OF ATOMS\n2\n\
         ITEM: BOX BOUNDS pp pp pp\n0 2\n0 2\n0 2\n\
         ITEM: ATOMS id type xu yu zu\n1 1 -0.5 1.0 1.0\n2 2 2.5 1.0 1.0\n"
    )
    .unwrap();

    let mut sys = System::new();
    sys.read_inputfile(file.path()).unwrap();
    assert_relative_eq!(sys.atoms()[0].position().x, 1.5, epsilon = 1e-12);
    assert_relative_eq!(sys.atoms()[1].position().x, 0.5, epsilon = 1e-12);

    sys.find_neighbors(NeighborMethod::Cutoff(1.1)).unwrap();
    assert_eq!(sys.atoms()[0].neighbors()[0].index, 1);
}

#[test]
fn test_missing_file_is_io_error() {
    let mut sys = System::new();
    assert!(matches!(
        sys.read_inputfile("/definitely/not/here.dump"),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_voronoi_walls_from_dump_flags() {
    // Two atoms stacked along z in a 4x4x4 box; z is closed by walls
    for (flags, n_neighbors) in [("ff ff ff", 1), ("pp pp ff", 5)] {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "ITEM: TIMESTEP\n0\nITEM: NUMBER OF ATOMS\n2\n\
             ITEM: BOX BOUNDS {flags}\n0 4\n0 4\n0 4\n\
             ITEM: ATOMS id type x y z\n1 1 2.0 2.0 1.0\n2 1 2.0 2.0 3.0\n"
        )
        .unwrap();

        let mut sys = System::new();
        sys.read_inputfile(file.path()).unwrap();
        assert!(!sys.cell().unwrap().pbc().z);
        sys.find_neighbors(NeighborMethod::Voronoi).unwrap();

        let total: f64 = sys.atoms().iter().filter_map(|a| a.volume()).sum();
        assert_relative_eq!(total, 64.0, epsilon = 1e-9);
        for (k, atom) in sys.atoms().iter().enumerate() {
            assert_relative_eq!(atom.volume().unwrap(), 32.0, epsilon = 1e-9);
            assert_eq!(atom.voronoi_vector(), Some([0, 6, 0, 0]), "{flags}");
            // Wall faces count as faces but not as neighbors
            assert_eq!(atom.voronoi().unwrap().face_areas.len(), 6);
            assert_eq!(atom.coordination(), n_neighbors, "{flags}");
            let other = atom.neighbors().iter().find(|n| n.index != k);
            assert_relative_eq!(other.unwrap().weight, 16.0, epsilon = 1e-9);
        }
    }
}
