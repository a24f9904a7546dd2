//! Word-level analysis of a modification request.

use cadplan_core::{Face, FeatureKind, FeatureShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Modify,
    Add,
    Remove,
}

/// Coarse placement named in a request, relative to the face center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Center,
    Left,
    Right,
    Front,
    Back,
    Corner,
}

impl Placement {
    /// Whether a feature offset from the face center fits this description.
    pub fn matches(&self, at: [f64; 2]) -> bool {
        const NEAR: f64 = 1e-6;
        match self {
            Placement::Center => at[0].abs() < NEAR && at[1].abs() < NEAR,
            Placement::Left => at[0] < -NEAR,
            Placement::Right => at[0] > NEAR,
            Placement::Front => at[1] < -NEAR,
            Placement::Back => at[1] > NEAR,
            Placement::Corner => at[0].abs() > NEAR && at[1].abs() > NEAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    Nth(usize),
    Last,
}

/// One clause of a request, e.g. "make the hole bigger" in
/// "make the hole bigger and the plate thicker".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clause {
    pub text: String,
    pub action: Option<Action>,
    pub kinds: Vec<FeatureKind>,
    pub shapes: Vec<FeatureShape>,
    pub placements: Vec<Placement>,
    pub face: Option<Face>,
    pub numbers: Vec<f64>,
    pub ordinal: Option<Ordinal>,
    pub mentions_base: bool,
    pub mentions_extrude: bool,
    /// Size words without a number: bigger, smaller, wider, deeper...
    pub resizes: bool,
}

impl Clause {
    pub fn action(&self) -> Action {
        self.action.unwrap_or(Action::Modify)
    }

    /// Whether the clause names a feature by kind, shape or ordinal.
    pub fn names_feature(&self) -> bool {
        !self.kinds.is_empty()
            || (!self.shapes.is_empty() && !self.mentions_base)
            || self.ordinal.is_some()
    }

    pub fn names_anything(&self) -> bool {
        self.names_feature() || self.mentions_base || self.mentions_extrude
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub text: String,
    pub clauses: Vec<Clause>,
}

impl EditRequest {
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let mut clauses: Vec<Clause> = split_clauses(&lowered)
            .into_iter()
            .map(analyze_clause)
            .filter(|clause| !clause.text.is_empty())
            .collect();

        // "add a hole and make it 8mm": later clauses inherit the action of
        // an earlier one only when they name nothing themselves.
        let mut previous_action = None;
        for clause in &mut clauses {
            if clause.action.is_none() && !clause.names_anything() {
                clause.action = previous_action;
            }
            previous_action = clause.action;
        }

        Self {
            text: text.to_string(),
            clauses,
        }
    }

    /// Whether any clause mentions a placement or a face.
    pub fn mentions_position(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| !c.placements.is_empty() || c.face.is_some())
    }
}

fn split_clauses(text: &str) -> Vec<&str> {
    let mut parts = vec![text];
    for separator in [";", ",", " and then ", " then ", " and ", " also "] {
        parts = parts
            .into_iter()
            .flat_map(|part| part.split(separator))
            .collect();
    }
    parts.into_iter().map(str::trim).collect()
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        .map(|w| w.trim_matches(|c: char| c == '.' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Numbers in a word: "10", "2.5mm", "10x20" (both sides).
fn numbers_in(word: &str) -> Vec<f64> {
    let word = word.strip_suffix("mm").unwrap_or(word);
    word.split('x')
        .filter_map(|part| {
            let part = part.strip_suffix("mm").unwrap_or(part);
            part.parse::<f64>().ok().filter(|n| n.is_finite())
        })
        .collect()
}

fn analyze_clause(text: &str) -> Clause {
    let mut clause = Clause {
        text: text.to_string(),
        ..Clause::default()
    };

    for word in words(text) {
        let w = word.as_str();
        clause.numbers.extend(numbers_in(w));

        match w {
            "add" | "insert" | "put" | "place" | "create" | "include" | "drill" => {
                clause.action.get_or_insert(Action::Add);
            }
            "remove" | "delete" | "drop" | "eliminate" | "erase" | "without" => {
                clause.action.get_or_insert(Action::Remove);
            }
            _ => {}
        }

        match w {
            "hole" | "holes" | "bore" | "opening" => push(&mut clause.kinds, FeatureKind::Hole),
            "cut" | "cuts" | "pocket" | "pockets" | "slot" | "slots" | "recess" | "groove"
            | "notch" | "cutout" => push(&mut clause.kinds, FeatureKind::Cut),
            "boss" | "bosses" | "bump" | "peg" | "post" | "stud" | "protrusion" | "standoff" => {
                push(&mut clause.kinds, FeatureKind::Boss)
            }
            _ => {}
        }

        match w {
            "circle" | "circular" | "round" | "cylindrical" => {
                push(&mut clause.shapes, FeatureShape::Circle)
            }
            "rectangle" | "rectangular" | "oblong" => {
                push(&mut clause.shapes, FeatureShape::Rectangle)
            }
            "square" | "squared" => push(&mut clause.shapes, FeatureShape::Square),
            "semicircle" | "semicircular" | "half-circle" | "d-shaped" => {
                push(&mut clause.shapes, FeatureShape::Semicircle)
            }
            "dome" | "domed" | "hemisphere" | "hemispherical" => {
                push(&mut clause.shapes, FeatureShape::Dome);
                push(&mut clause.kinds, FeatureKind::Boss);
            }
            _ => {}
        }

        match w {
            "center" | "centre" | "middle" | "centered" | "centred" => {
                push(&mut clause.placements, Placement::Center)
            }
            "left" => push(&mut clause.placements, Placement::Left),
            "right" => push(&mut clause.placements, Placement::Right),
            "front" => push(&mut clause.placements, Placement::Front),
            "back" | "rear" => push(&mut clause.placements, Placement::Back),
            "corner" | "corners" => push(&mut clause.placements, Placement::Corner),
            "top" | "upper" => clause.face = Some(Face::Top),
            "bottom" | "underside" | "lower" => clause.face = Some(Face::Bottom),
            _ => {}
        }

        match w {
            "first" | "1st" => clause.ordinal = Some(Ordinal::Nth(0)),
            "second" | "2nd" => clause.ordinal = Some(Ordinal::Nth(1)),
            "third" | "3rd" => clause.ordinal = Some(Ordinal::Nth(2)),
            "fourth" | "4th" => clause.ordinal = Some(Ordinal::Nth(3)),
            "fifth" | "5th" => clause.ordinal = Some(Ordinal::Nth(4)),
            "last" => clause.ordinal = Some(Ordinal::Last),
            _ => {}
        }

        match w {
            "plate" | "base" | "sketch" | "part" | "body" | "disc" | "disk" | "block"
            | "panel" | "outline" => clause.mentions_base = true,
            "thickness" | "thick" | "thicker" | "thinner" | "extrusion" | "extrude" => {
                clause.mentions_extrude = true
            }
            _ => {}
        }

        if matches!(
            w,
            "bigger" | "larger" | "smaller" | "wider" | "narrower" | "longer" | "shorter"
                | "deeper" | "shallower" | "taller" | "grow" | "shrink" | "enlarge"
                | "reduce" | "increase" | "decrease" | "double" | "halve"
        ) {
            clause.resizes = true;
        }
    }

    clause
}

fn push<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hole_resize() {
        let request = EditRequest::parse("Make the hole bigger");
        assert_eq!(request.clauses.len(), 1);
        let clause = &request.clauses[0];
        assert_eq!(clause.kinds, vec![FeatureKind::Hole]);
        assert_eq!(clause.action(), Action::Modify);
        assert!(clause.resizes);
    }

    #[test]
    fn test_numbers_with_units() {
        let request = EditRequest::parse("change the pocket to 10x20mm, 2.5mm deep");
        let numbers: Vec<f64> = request.clauses.iter().flat_map(|c| c.numbers.clone()).collect();
        assert_eq!(numbers, vec![10.0, 20.0, 2.5]);
    }

    #[test]
    fn test_separate_clauses() {
        let request = EditRequest::parse("remove the second hole and make the plate thicker");
        assert_eq!(request.clauses.len(), 2);
        assert_eq!(request.clauses[0].action(), Action::Remove);
        assert_eq!(request.clauses[0].ordinal, Some(Ordinal::Nth(1)));
        assert!(request.clauses[1].mentions_base);
        assert!(request.clauses[1].mentions_extrude);
    }

    #[test]
    fn test_square_plate_is_the_base() {
        let request = EditRequest::parse("make the square plate 60mm");
        let clause = &request.clauses[0];
        assert!(clause.mentions_base);
        assert!(!clause.names_feature());
    }

    #[test]
    fn test_dome_implies_boss() {
        let request = EditRequest::parse("add a dome in the corner");
        let clause = &request.clauses[0];
        assert_eq!(clause.action(), Action::Add);
        assert_eq!(clause.kinds, vec![FeatureKind::Boss]);
        assert_eq!(clause.placements, vec![Placement::Corner]);
    }
}
