//! Drop-target resolution for the lead board.
//!
//! Three strategies are tried in order, the first one that yields a target
//! wins:
//!
//! 1. pointer within: droppables under the pointer, nearest corners first
//! 2. rect intersection: largest overlap ratio with the dragged card
//! 3. closest centre: nearest droppable centre to the dragged card's centre
//!
//! Columns and cards are both droppables, so a pointer over a card inside a
//! column resolves to the card (its corners are closer).

use super::geometry::{Point, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct Droppable {
    pub id: String,
    pub rect: Rect,
}

impl Droppable {
    pub fn new(id: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: id.into(),
            rect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PointerWithin,
    RectIntersection,
    ClosestCentre,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collision<'a> {
    pub id: &'a str,
    pub strategy: Strategy,
}

/// Pick the droppable the dragged card is over, or `None` when there are no
/// droppables at all.
pub fn resolve_drop<'a>(
    pointer: Option<Point>,
    active: &Rect,
    targets: &'a [Droppable],
) -> Option<Collision<'a>> {
    if let Some(p) = pointer {
        if let Some(id) = pointer_within(p, targets) {
            return Some(Collision {
                id,
                strategy: Strategy::PointerWithin,
            });
        }
    }
    if let Some(id) = rect_intersection(active, targets) {
        return Some(Collision {
            id,
            strategy: Strategy::RectIntersection,
        });
    }
    closest_centre(active, targets).map(|id| Collision {
        id,
        strategy: Strategy::ClosestCentre,
    })
}

fn corner_distance(p: Point, r: &Rect) -> f64 {
    let corners = [
        Point::new(r.left, r.top),
        Point::new(r.right(), r.top),
        Point::new(r.left, r.bottom()),
        Point::new(r.right(), r.bottom()),
    ];
    corners.iter().map(|c| p.distance_to(*c)).sum::<f64>() / 4.0
}

fn pointer_within(p: Point, targets: &[Droppable]) -> Option<&str> {
    targets
        .iter()
        .filter(|t| t.rect.contains(p))
        .min_by(|a, b| corner_distance(p, &a.rect).total_cmp(&corner_distance(p, &b.rect)))
        .map(|t| t.id.as_str())
}

fn rect_intersection<'a>(active: &Rect, targets: &'a [Droppable]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for t in targets {
        let ratio = active.intersection_ratio(&t.rect);
        if ratio <= 0.0 {
            continue;
        }
        if best.map(|(_, r)| ratio > r).unwrap_or(true) {
            best = Some((t.id.as_str(), ratio));
        }
    }
    best.map(|(id, _)| id)
}

fn closest_centre<'a>(active: &Rect, targets: &'a [Droppable]) -> Option<&'a str> {
    let c = active.centre();
    targets
        .iter()
        .min_by(|a, b| {
            c.distance_to(a.rect.centre())
                .total_cmp(&c.distance_to(b.rect.centre()))
        })
        .map(|t| t.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Vec<Droppable> {
        vec![
            Droppable::new("New", Rect::new(0.0, 0.0, 300.0, 800.0)),
            Droppable::new("Contacted", Rect::new(320.0, 0.0, 300.0, 800.0)),
            Droppable::new("lead-1", Rect::new(330.0, 50.0, 280.0, 100.0)),
        ]
    }

    #[test]
    fn pointer_over_card_beats_its_column() {
        let targets = board();
        let hit = resolve_drop(
            Some(Point::new(400.0, 100.0)),
            &Rect::new(350.0, 60.0, 280.0, 100.0),
            &targets,
        )
        .unwrap();
        assert_eq!(hit.id, "lead-1");
        assert_eq!(hit.strategy, Strategy::PointerWithin);
    }

    #[test]
    fn falls_back_to_intersection_when_pointer_is_in_a_gap() {
        let targets = board();
        // Pointer in the gutter between columns, card mostly over "Contacted".
        let hit = resolve_drop(
            Some(Point::new(310.0, 400.0)),
            &Rect::new(300.0, 380.0, 280.0, 100.0),
            &targets,
        )
        .unwrap();
        assert_eq!(hit.id, "Contacted");
        assert_eq!(hit.strategy, Strategy::RectIntersection);
    }

    #[test]
    fn falls_back_to_closest_centre_when_nothing_overlaps() {
        let targets = board();
        let hit = resolve_drop(None, &Rect::new(700.0, 350.0, 50.0, 50.0), &targets).unwrap();
        assert_eq!(hit.id, "Contacted");
        assert_eq!(hit.strategy, Strategy::ClosestCentre);
    }

    #[test]
    fn no_targets_no_collision() {
        assert!(resolve_drop(Some(Point::new(0.0, 0.0)), &Rect::default(), &[]).is_none());
    }
}
