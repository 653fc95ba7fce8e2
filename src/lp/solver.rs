//! External solver driver.
//!
//! The program is written to disk in CPLEX LP format and handed to a solver
//! binary (GLPK's `glpsol` by default); the machine-readable solution file
//! it writes back is parsed into a dense value vector, in column order.
//! Solving is one blocking call per program. Infeasibility is fatal and the
//! error names the `.lp` file so the run can be diagnosed offline.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use thiserror::Error;

use crate::lp::LinearProgram;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to launch solver '{program}': {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("solver '{program}' failed: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("program is infeasible; inspect {}", lp_path.display())]
    Infeasible { lp_path: PathBuf },

    #[error("malformed solution file {}: {reason}", path.display())]
    MalformedSolution { path: PathBuf, reason: String },
}

/// A solved assignment, one value per variable in column order.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub values: Vec<f64>,
    pub objective: f64,
}

/// Anything that can solve a [`LinearProgram`].
pub trait LpSolver {
    /// Solves the program, persisting it at `lp_path` for diagnostics.
    fn solve(&self, program: &LinearProgram, lp_path: &Path) -> Result<Solution, SolverError>;
}

/// Driver for GLPK's `glpsol` command-line solver.
pub struct GlpsolSolver {
    binary: PathBuf,
}

impl GlpsolSolver {
    pub fn new() -> Self {
        GlpsolSolver {
            binary: PathBuf::from("glpsol"),
        }
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        GlpsolSolver { binary }
    }
}

impl Default for GlpsolSolver {
    fn default() -> Self {
        GlpsolSolver::new()
    }
}

impl LpSolver for GlpsolSolver {
    fn solve(&self, program: &LinearProgram, lp_path: &Path) -> Result<Solution, SolverError> {
        let mut writer = BufWriter::new(File::create(lp_path)?);
        program.write_lp(&mut writer)?;
        drop(writer);

        let solution_path = lp_path.with_extension("sol");
        let binary = self.binary.display().to_string();
        info!(
            "solving {} ({} variables, {} constraints)",
            lp_path.display(),
            program.num_variables(),
            program.num_constraints()
        );
        let output = Command::new(&self.binary)
            .arg("--lp")
            .arg(lp_path)
            .arg("--write")
            .arg(&solution_path)
            .output()
            .map_err(|source| SolverError::Launch {
                program: binary.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SolverError::Failed {
                program: binary,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let text = std::fs::read_to_string(&solution_path)?;
        let solution =
            parse_solution(&text, program.num_variables(), &solution_path, lp_path)?;
        debug!("objective {}", solution.objective);
        Ok(solution)
    }
}

/// Parses GLPK's plain-text solution format: an `s` status line, then one
/// `j <column> ...` line per variable with the primal value as the first
/// numeric field.
fn parse_solution(
    text: &str,
    num_variables: usize,
    path: &Path,
    lp_path: &Path,
) -> Result<Solution, SolverError> {
    let mut values = vec![0.0; num_variables];
    let mut objective = 0.0;
    let mut saw_status = false;
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&"s") => {
                saw_status = true;
                let statuses: Vec<char> = tokens[1..]
                    .iter()
                    .filter(|t| t.len() == 1)
                    .filter_map(|t| t.chars().next())
                    .filter(|c| c.is_ascii_alphabetic())
                    .collect();
                if statuses.iter().any(|&c| c == 'i' || c == 'n') {
                    return Err(SolverError::Infeasible {
                        lp_path: lp_path.to_path_buf(),
                    });
                }
                if let Some(last) = tokens.last() {
                    objective = last.parse().unwrap_or(0.0);
                }
            }
            Some(&"j") => {
                let column: usize = tokens
                    .get(1)
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| SolverError::MalformedSolution {
                        path: path.to_path_buf(),
                        reason: format!("unparseable column line: {:?}", line),
                    })?;
                if column == 0 || column > num_variables {
                    return Err(SolverError::MalformedSolution {
                        path: path.to_path_buf(),
                        reason: format!("column {} out of range", column),
                    });
                }
                // the primal value is the first numeric field after the
                // column ordinal; a one-letter basis status may precede it
                let value = tokens[2..]
                    .iter()
                    .find_map(|t| t.parse::<f64>().ok())
                    .ok_or_else(|| SolverError::MalformedSolution {
                        path: path.to_path_buf(),
                        reason: format!("no primal value in line: {:?}", line),
                    })?;
                values[column - 1] = value;
            }
            _ => {}
        }
    }
    if !saw_status {
        return Err(SolverError::MalformedSolution {
            path: path.to_path_buf(),
            reason: "missing status line".to_string(),
        });
    }
    Ok(Solution { values, objective })
}

#[cfg(test)]
pub mod testing {
    //! An exact in-process solver for the separable programs the tests
    //! build: every balance row touches a single dosage variable, so each
    //! dosage minimizes its own piecewise-linear objective independently.

    use std::collections::BTreeMap;
    use std::path::Path;

    use crate::lp::{LinearProgram, Sense};

    use super::{LpSolver, Solution, SolverError};

    pub struct SeparableSolver;

    impl LpSolver for SeparableSolver {
        fn solve(
            &self,
            program: &LinearProgram,
            lp_path: &Path,
        ) -> Result<Solution, SolverError> {
            let mut file = std::fs::File::create(lp_path)?;
            program.write_lp(&mut file)?;
            let variables = program.variables();
            let is_dosage = |index: usize| variables[index].name.starts_with('c');
            // balance rows per dosage variable: (coefficient, rhs, error column)
            let mut rows: BTreeMap<usize, Vec<(f64, f64, usize)>> = BTreeMap::new();
            for constraint in program.constraints() {
                if constraint.sense != Sense::Equal {
                    continue;
                }
                let dosages: Vec<(usize, f64)> = constraint
                    .terms
                    .iter()
                    .copied()
                    .filter(|&(index, _)| is_dosage(index))
                    .collect();
                let error = constraint
                    .terms
                    .iter()
                    .copied()
                    .find(|&(index, _)| variables[index].name.starts_with('e'));
                if dosages.len() != 1 {
                    return Err(SolverError::MalformedSolution {
                        path: lp_path.to_path_buf(),
                        reason: "separable solver needs one dosage per row".to_string(),
                    });
                }
                let (dosage, coefficient) = dosages[0];
                let error_column = error.map(|(index, _)| index).unwrap_or(usize::MAX);
                rows.entry(dosage).or_default().push((
                    coefficient,
                    constraint.rhs,
                    error_column,
                ));
            }

            let mut values = vec![0.0; variables.len()];
            for (dosage, rows) in rows {
                let lb = variables[dosage].lb;
                let ub = variables[dosage].ub;
                let mut candidates = vec![lb, ub];
                for &(a, b, _) in &rows {
                    if a != 0.0 {
                        candidates.push((b / a).clamp(lb, ub));
                    }
                }
                let cost = |c: f64| -> f64 {
                    rows.iter().map(|&(a, b, _)| (b - a * c).abs()).sum()
                };
                let mut best = candidates[0];
                for &candidate in &candidates[1..] {
                    if cost(candidate) < cost(best) {
                        best = candidate;
                    }
                }
                values[dosage] = best;
                for &(a, b, error_column) in &rows {
                    if error_column != usize::MAX {
                        values[error_column] = b - a * best;
                    }
                }
            }
            // absolute-value surrogates mirror their error columns by name
            for index in 0..variables.len() {
                if let Some(suffix) = variables[index].name.strip_prefix('l') {
                    let error_name = format!("e{}", suffix);
                    if let Some(error_column) =
                        variables.iter().position(|v| v.name == error_name)
                    {
                        values[index] = values[error_column].abs();
                    }
                }
            }
            let objective = program.objective_value(&values);
            Ok(Solution { values, objective })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::Sense;
    use tempfile::tempdir;

    const BAS_SOLUTION: &str = "\
c Problem:    genotyping
c Rows:       3
c Columns:    3
s bas 3 3 f f 0
i 1 b 16 0
i 2 b 0 0
i 3 b 0 0
j 1 b 0.5 0
j 2 l 0 0
j 3 l 0 0
e o f
";

    #[test]
    fn test_parse_basic_solution() {
        let solution = parse_solution(
            BAS_SOLUTION,
            3,
            Path::new("x.sol"),
            Path::new("x.lp"),
        )
        .unwrap();
        assert_eq!(solution.values, vec![0.5, 0.0, 0.0]);
        assert_eq!(solution.objective, 0.0);
    }

    #[test]
    fn test_parse_flags_infeasible() {
        let text = "s bas 3 3 i f 0\n";
        let result = parse_solution(text, 3, Path::new("x.sol"), Path::new("x.lp"));
        assert!(matches!(result, Err(SolverError::Infeasible { .. })));
    }

    #[test]
    fn test_parse_rejects_out_of_range_column() {
        let text = "s bas 1 5 f f 0\nj 9 b 1 0\n";
        let result = parse_solution(text, 3, Path::new("x.sol"), Path::new("x.lp"));
        assert!(matches!(
            result,
            Err(SolverError::MalformedSolution { .. })
        ));
    }

    #[test]
    fn test_parse_requires_status_line() {
        let result = parse_solution("j 1 b 1 0\n", 3, Path::new("x.sol"), Path::new("x.lp"));
        assert!(matches!(
            result,
            Err(SolverError::MalformedSolution { .. })
        ));
    }

    #[test]
    fn test_separable_solver_matches_counts() {
        let mut program = LinearProgram::new();
        let c = program.add_variable("c_chr1_100_200", 0.0, 1.0, 0.0);
        let e = program.add_variable("e0", -32.0, 0.0, 0.0);
        let l = program.add_variable("l0", 0.0, f64::INFINITY, 1.0);
        // count of 16 at coverage 32: dosage 0.5
        program.add_constraint(vec![(c, 32.0), (e, 1.0)], Sense::Equal, 16.0);
        program.add_constraint(vec![(l, 1.0), (e, 1.0)], Sense::GreaterEqual, 0.0);
        program.add_constraint(vec![(l, 1.0), (e, -1.0)], Sense::GreaterEqual, 0.0);

        let dir = tempdir().unwrap();
        let solution = testing::SeparableSolver
            .solve(&program, &dir.path().join("t.lp"))
            .unwrap();
        assert!((solution.values[0] - 0.5).abs() < 1e-9);
        assert!(solution.values[1].abs() < 1e-9);
        assert!(solution.objective.abs() < 1e-9);
        assert!(program.satisfied(&solution.values, 1e-6));
    }

    #[test]
    fn test_separable_solver_clamps_to_bounds() {
        let mut program = LinearProgram::new();
        let c = program.add_variable("c_chr1_5_9", 0.0, 1.0, 0.0);
        let e = program.add_variable("e0", -10.0, 40.0, 0.0);
        let l = program.add_variable("l0", 0.0, f64::INFINITY, 1.0);
        // count of 50 at coverage 10: dosage would be 5, clamped to 1
        program.add_constraint(vec![(c, 10.0), (e, 1.0)], Sense::Equal, 50.0);
        program.add_constraint(vec![(l, 1.0), (e, 1.0)], Sense::GreaterEqual, 0.0);
        program.add_constraint(vec![(l, 1.0), (e, -1.0)], Sense::GreaterEqual, 0.0);

        let dir = tempdir().unwrap();
        let solution = testing::SeparableSolver
            .solve(&program, &dir.path().join("t.lp"))
            .unwrap();
        assert!((solution.values[0] - 1.0).abs() < 1e-9);
        assert!((solution.objective - 40.0).abs() < 1e-9);
    }
}
