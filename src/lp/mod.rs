//! Linear programming layer.
//!
//! The genotyper expresses its question as a linear program: how much of
//! each event's sequence dosage best explains the observed k-mer counts.
//! This module holds the program representation and its CPLEX-LP-format
//! writer; `builder` assembles the genotyping program, `solver` drives an
//! external solver binary, `genotype` decodes the solution.

pub mod builder;
pub mod genotype;
pub mod solver;

use std::io::{self, Write};

/// One decision variable with simple bounds and an objective coefficient.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub lb: f64,
    pub ub: f64,
    pub objective: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Equal,
    GreaterEqual,
}

/// A sparse constraint row: `sum(coefficient * variable) sense rhs`.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub terms: Vec<(usize, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

/// A minimization program over continuous variables.
#[derive(Clone, Debug, Default)]
pub struct LinearProgram {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
}

impl LinearProgram {
    pub fn new() -> Self {
        LinearProgram::default()
    }

    /// Adds a variable and returns its column index.
    pub fn add_variable(&mut self, name: &str, lb: f64, ub: f64, objective: f64) -> usize {
        self.variables.push(Variable {
            name: name.to_string(),
            lb,
            ub,
            objective,
        });
        self.variables.len() - 1
    }

    pub fn add_constraint(&mut self, terms: Vec<(usize, f64)>, sense: Sense, rhs: f64) {
        self.constraints.push(Constraint { terms, sense, rhs });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Objective value of an assignment.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(variable, value)| variable.objective * value)
            .sum()
    }

    /// Whether an assignment satisfies every bound and constraint, up to
    /// `tolerance`.
    pub fn satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        if values.len() != self.variables.len() {
            return false;
        }
        for (variable, &value) in self.variables.iter().zip(values) {
            if value < variable.lb - tolerance || value > variable.ub + tolerance {
                return false;
            }
        }
        for constraint in &self.constraints {
            let lhs: f64 = constraint
                .terms
                .iter()
                .map(|&(index, coefficient)| coefficient * values[index])
                .sum();
            let ok = match constraint.sense {
                Sense::Equal => (lhs - constraint.rhs).abs() <= tolerance,
                Sense::GreaterEqual => lhs >= constraint.rhs - tolerance,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Writes the program in CPLEX LP format, the dialect both CPLEX and
    /// glpsol read.
    pub fn write_lp<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "\\ Problem: genotyping")?;
        writeln!(writer, "Minimize")?;
        write!(writer, " obj:")?;
        let mut wrote_term = false;
        for variable in &self.variables {
            if variable.objective != 0.0 {
                write!(writer, " + {} {}", variable.objective, variable.name)?;
                wrote_term = true;
            }
        }
        if !wrote_term {
            // a constant objective still needs a syntactic expression
            if let Some(variable) = self.variables.first() {
                write!(writer, " 0 {}", variable.name)?;
            }
        }
        writeln!(writer)?;

        writeln!(writer, "Subject To")?;
        for (index, constraint) in self.constraints.iter().enumerate() {
            write!(writer, " r{}:", index)?;
            for &(column, coefficient) in &constraint.terms {
                let name = &self.variables[column].name;
                if coefficient < 0.0 {
                    write!(writer, " - {} {}", -coefficient, name)?;
                } else {
                    write!(writer, " + {} {}", coefficient, name)?;
                }
            }
            let sense = match constraint.sense {
                Sense::Equal => "=",
                Sense::GreaterEqual => ">=",
            };
            writeln!(writer, " {} {}", sense, constraint.rhs)?;
        }

        writeln!(writer, "Bounds")?;
        for variable in &self.variables {
            // defaults are [0, +inf); only deviations need spelling out
            if variable.lb == 0.0 && variable.ub == f64::INFINITY {
                continue;
            }
            if variable.ub == f64::INFINITY {
                writeln!(writer, " {} >= {}", variable.name, variable.lb)?;
            } else {
                writeln!(writer, " {} <= {} <= {}", variable.lb, variable.name, variable.ub)?;
            }
        }
        writeln!(writer, "End")?;
        Ok(())
    }
}
