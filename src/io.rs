//! LAMMPS text dump files.
//!
//! Only the first frame of a file is read. Boxes may be orthogonal or
//! restricted triclinic (`ITEM: BOX BOUNDS xy xz yz ...`).

use crate::atom::Atom;
use crate::cell::{Cell, CellError};
use crate::error::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

const MAX_PREALLOCATED_ATOMS: usize = 1 << 16;

/// One snapshot of a dump file.
#[derive(Clone, Debug)]
pub struct DumpFrame {
    pub timestep: u64,
    pub atoms: Vec<Atom>,
    pub cell: Cell,
}

struct LineReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next non-blank line, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<String>> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn expect_line(&mut self, what: &str) -> Result<String> {
        self.next_line()?.ok_or_else(|| {
            Error::parse(
                self.line_no + 1,
                format!("unexpected end of input, expected {what}"),
            )
        })
    }

    fn parse_value<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let line = self.expect_line(what)?;
        let value = line.trim();
        value
            .parse()
            .map_err(|_| Error::parse(self.line_no, format!("invalid {what}: '{value}'")))
    }

    fn parse_floats(&mut self, what: &str, min: usize) -> Result<Vec<f64>> {
        let line = self.expect_line(what)?;
        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::parse(self.line_no, format!("invalid number in {what}")))?;
        if values.len() < min {
            return Err(Error::parse(
                self.line_no,
                format!("{what} needs {min} values, found {}", values.len()),
            ));
        }
        Ok(values)
    }
}

/// Which columns of an `ITEM: ATOMS` line hold what.
struct AtomColumns {
    id: Option<usize>,
    atom_type: Option<usize>,
    coords: [usize; 3],
    scaled: bool,
    width: usize,
}

impl AtomColumns {
    fn from_header(names: &[&str], line_no: usize) -> Result<Self> {
        let find = |name: &str| names.iter().position(|&c| c == name);
        let find_xyz = |suffix: &str| -> Option<[usize; 3]> {
            Some([
                find(&format!("x{suffix}"))?,
                find(&format!("y{suffix}"))?,
                find(&format!("z{suffix}"))?,
            ])
        };

        let (coords, scaled) = if let Some(c) = find_xyz("") {
            (c, false)
        } else if let Some(c) = find_xyz("u") {
            (c, false)
        } else if let Some(c) = find_xyz("s") {
            (c, true)
        } else if let Some(c) = find_xyz("su") {
            (c, true)
        } else {
            return Err(Error::parse(
                line_no,
                "ATOMS header has no x y z, xu yu zu or xs ys zs columns",
            ));
        };

        Ok(Self {
            id: find("id"),
            atom_type: find("type"),
            coords,
            scaled,
            width: names.len(),
        })
    }
}

fn read_box<R: BufRead>(lines: &mut LineReader<R>, header: &str) -> Result<Cell> {
    let tokens: Vec<&str> = header.split_whitespace().collect();
    let triclinic = tokens.contains(&"xy");
    let flags: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !matches!(*t, "xy" | "xz" | "yz"))
        .collect();
    let pbc = match flags.as_slice() {
        [] => Vector3::new(true, true, true),
        [x, y, z] => Vector3::new(*x == "pp", *y == "pp", *z == "pp"),
        _ => {
            return Err(Error::parse(
                lines.line_no,
                "BOX BOUNDS needs three boundary flags",
            ));
        }
    };

    let min = if triclinic { 3 } else { 2 };
    let x = lines.parse_floats("x box bounds", min)?;
    let y = lines.parse_floats("y box bounds", min)?;
    let z = lines.parse_floats("z box bounds", min)?;
    let (xy, xz, yz) = if triclinic {
        (x[2], y[2], z[2])
    } else {
        (0.0, 0.0, 0.0)
    };

    // Bounds in the file enclose the tilted box; recover the box corners
    let xlo = x[0] - 0f64.min(xy).min(xz).min(xy + xz);
    let xhi = x[1] - 0f64.max(xy).max(xz).max(xy + xz);
    let ylo = y[0] - 0f64.min(yz);
    let yhi = y[1] - 0f64.max(yz);
    let (zlo, zhi) = (z[0], z[1]);

    if !(xhi > xlo && yhi > ylo && zhi > zlo) {
        return Err(Error::parse(lines.line_no, "box bounds must satisfy lo < hi"));
    }

    #[rustfmt::skip]
    let h = Matrix3::new(
        xhi - xlo, xy,        xz,
        0.0,       yhi - ylo, yz,
        0.0,       0.0,       zhi - zlo,
    );
    Ok(Cell::with_origin(h, Vector3::new(xlo, ylo, zlo), pbc)?)
}

fn read_atoms<R: BufRead>(
    lines: &mut LineReader<R>,
    header: &str,
    n_atoms: usize,
    cell: &Cell,
) -> Result<Vec<Atom>> {
    let names: Vec<&str> = header.split_whitespace().collect();
    let cols = AtomColumns::from_header(&names, lines.line_no)?;
    // The count comes from the file; let a bogus one fail on a missing line
    let mut atoms = Vec::with_capacity(n_atoms.min(MAX_PREALLOCATED_ATOMS));

    for index in 0..n_atoms {
        let line = lines.expect_line("atom line")?;
        let line_no = lines.line_no;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < cols.width {
            return Err(Error::parse(
                line_no,
                format!("expected {} columns, found {}", cols.width, fields.len()),
            ));
        }

        let id = match cols.id {
            Some(c) => fields[c]
                .parse()
                .map_err(|_| Error::parse(line_no, format!("invalid atom id '{}'", fields[c])))?,
            None => index + 1,
        };
        let atom_type = match cols.atom_type {
            Some(c) => fields[c].parse().map_err(|_| {
                Error::parse(line_no, format!("invalid atom type '{}'", fields[c]))
            })?,
            None => 1,
        };
        let mut xyz = [0.0; 3];
        for (v, &c) in xyz.iter_mut().zip(&cols.coords) {
            *v = fields[c].parse().map_err(|_| {
                Error::parse(line_no, format!("invalid coordinate '{}'", fields[c]))
            })?;
        }
        let position = if cols.scaled {
            let cart = cell.to_cartesian(&Vector3::from(xyz));
            [cart.x, cart.y, cart.z]
        } else {
            xyz
        };
        atoms.push(Atom::new(id, atom_type, position));
    }
    Ok(atoms)
}

/// Reads the first frame of a LAMMPS dump.
pub fn read_dump<R: BufRead>(reader: R) -> Result<DumpFrame> {
    let mut lines = LineReader::new(reader);
    let mut timestep = 0;
    let mut n_atoms = None;
    let mut cell = None;

    while let Some(line) = lines.next_line()? {
        let Some(item) = line.trim().strip_prefix("ITEM:") else {
            return Err(Error::parse(
                lines.line_no,
                format!("expected an ITEM: header, found '{}'", line.trim()),
            ));
        };
        let item = item.trim();

        if item == "TIMESTEP" {
            timestep = lines.parse_value("timestep")?;
        } else if item == "NUMBER OF ATOMS" {
            n_atoms = Some(lines.parse_value::<usize>("number of atoms")?);
        } else if let Some(rest) = item.strip_prefix("BOX BOUNDS") {
            cell = Some(read_box(&mut lines, rest)?);
        } else if let Some(rest) = item.strip_prefix("ATOMS") {
            let line_no = lines.line_no;
            let n = n_atoms
                .ok_or_else(|| Error::parse(line_no, "ATOMS section before NUMBER OF ATOMS"))?;
            let cell =
                cell.ok_or_else(|| Error::parse(line_no, "ATOMS section before BOX BOUNDS"))?;
            let atoms = read_atoms(&mut lines, rest, n, &cell)?;
            debug!(timestep, n_atoms = atoms.len(), "read dump frame");
            return Ok(DumpFrame {
                timestep,
                atoms,
                cell,
            });
        } else {
            // UNITS, TIME and similar single-value items
            lines.expect_line(item)?;
        }
    }

    Err(Error::parse(lines.line_no, "no ATOMS section found"))
}

pub fn read_dump_file(path: impl AsRef<Path>) -> Result<DumpFrame> {
    let file = File::open(path)?;
    read_dump(BufReader::new(file))
}

/// Writes one frame with `id type x y z` columns.
///
/// The cell must be in LAMMPS restricted triclinic form: the first box
/// vector along x and the second in the xy plane.
pub fn write_dump<W: Write>(
    mut writer: W,
    timestep: u64,
    atoms: &[Atom],
    cell: &Cell,
) -> Result<()> {
    let h = cell.h();
    if h[(1, 0)] != 0.0 || h[(2, 0)] != 0.0 || h[(2, 1)] != 0.0 {
        return Err(CellError::NotRestrictedTriclinic.into());
    }
    let (xy, xz, yz) = (h[(0, 1)], h[(0, 2)], h[(1, 2)]);
    let triclinic = xy != 0.0 || xz != 0.0 || yz != 0.0;
    let o = cell.origin();
    let flag = |p: bool| if p { "pp" } else { "ff" };
    let pbc = cell.pbc();

    writeln!(writer, "ITEM: TIMESTEP")?;
    writeln!(writer, "{timestep}")?;
    writeln!(writer, "ITEM: NUMBER OF ATOMS")?;
    writeln!(writer, "{}", atoms.len())?;
    writeln!(
        writer,
        "ITEM: BOX BOUNDS {}{} {} {}",
        if triclinic { "xy xz yz " } else { "" },
        flag(pbc.x),
        flag(pbc.y),
        flag(pbc.z)
    )?;

    let (xlo, xhi) = (o.x, o.x + h[(0, 0)]);
    let (ylo, yhi) = (o.y, o.y + h[(1, 1)]);
    let (zlo, zhi) = (o.z, o.z + h[(2, 2)]);
    if triclinic {
        let xlo_bound = xlo + 0f64.min(xy).min(xz).min(xy + xz);
        let xhi_bound = xhi + 0f64.max(xy).max(xz).max(xy + xz);
        writeln!(writer, "{xlo_bound} {xhi_bound} {xy}")?;
        writeln!(writer, "{} {} {xz}", ylo + 0f64.min(yz), yhi + 0f64.max(yz))?;
        writeln!(writer, "{zlo} {zhi} {yz}")?;
    } else {
        writeln!(writer, "{xlo} {xhi}")?;
        writeln!(writer, "{ylo} {yhi}")?;
        writeln!(writer, "{zlo} {zhi}")?;
    }

    writeln!(writer, "ITEM: ATOMS id type x y z")?;
    for atom in atoms {
        let p = atom.position();
        writeln!(
            writer,
            "{} {} {} {} {}",
            atom.id(),
            atom.atom_type(),
            p.x,
            p.y,
            p.z
        )?;
    }
    Ok(())
}

pub fn write_dump_file(
    path: impl AsRef<Path>,
    timestep: u64,
    atoms: &[Atom],
    cell: &Cell,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_dump(&mut writer, timestep, atoms, cell)?;
    writer.flush()?;
    Ok(())
}
