// ==============================================================================
// pedigree.rs - Families Provider
// ==============================================================================
// Description: Arena of pedigree members indexed by (family_id, person_id),
//              with families holding member index lists in canonical order
// Author: Matt Barham
// Created: 2025-11-15
// Modified: 2025-11-23
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::attributes::{Role, Sex, Status};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PedigreeError {
    #[error("Duplicate person '{person_id}' in family '{family_id}'")]
    DuplicatePerson { family_id: String, person_id: String },
}

/// One pedigree member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub family_id: String,
    pub person_id: String,
    pub mom_id: Option<String>,
    pub dad_id: Option<String>,
    pub sex: Sex,
    pub status: Status,
    pub role: Role,
}

impl Person {
    pub fn new(family_id: &str, person_id: &str, role: Role, sex: Sex, status: Status) -> Self {
        Self {
            family_id: family_id.to_string(),
            person_id: person_id.to_string(),
            mom_id: None,
            dad_id: None,
            sex,
            status,
            role,
        }
    }

    pub fn with_parents(mut self, mom_id: &str, dad_id: &str) -> Self {
        self.mom_id = Some(mom_id.to_string());
        self.dad_id = Some(dad_id.to_string());
        self
    }
}

/// Family as a list of indices into the person arena
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    family_id: String,
    members: Vec<usize>,
}

/// Child with both parents present in the same family (member positions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trio {
    pub child: usize,
    pub mom: usize,
    pub dad: usize,
}

/// Read-only view of one family
#[derive(Debug, Clone, Copy)]
pub struct FamilyView<'a> {
    data: &'a FamiliesData,
    family: &'a Family,
}

impl<'a> FamilyView<'a> {
    pub fn family_id(&self) -> &'a str {
        &self.family.family_id
    }

    pub fn len(&self) -> usize {
        self.family.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.family.members.is_empty()
    }

    /// Members in genotype column order
    pub fn members_in_order(&self) -> impl Iterator<Item = &'a Person> + 'a {
        let persons = &self.data.persons;
        self.family.members.iter().map(move |&index| &persons[index])
    }

    pub fn member(&self, position: usize) -> Option<&'a Person> {
        self.family.members.get(position).map(|&index| &self.data.persons[index])
    }

    pub fn members_ids(&self) -> Vec<&'a str> {
        self.members_in_order().map(|person| person.person_id.as_str()).collect()
    }

    pub fn member_position(&self, person_id: &str) -> Option<usize> {
        self.members_in_order().position(|person| person.person_id == person_id)
    }

    /// Children whose mom and dad are both members
    pub fn trios(&self) -> Vec<Trio> {
        let mut trios = Vec::new();
        for (child, person) in self.members_in_order().enumerate() {
            let mom = person.mom_id.as_deref().and_then(|id| self.member_position(id));
            let dad = person.dad_id.as_deref().and_then(|id| self.member_position(id));
            if let (Some(mom), Some(dad)) = (mom, dad) {
                trios.push(Trio { child, mom, dad });
            }
        }
        trios
    }
}

/// Pedigree arena
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FamiliesData {
    persons: Vec<Person>,
    person_index: HashMap<(String, String), usize>,
    families: Vec<Family>,
    family_index: HashMap<String, usize>,
}

impl FamiliesData {
    /// Build from persons; families keep first-seen member order
    pub fn from_persons(persons: Vec<Person>) -> Result<Self, PedigreeError> {
        let mut data = FamiliesData::default();
        for person in persons {
            let key = (person.family_id.clone(), person.person_id.clone());
            if data.person_index.contains_key(&key) {
                return Err(PedigreeError::DuplicatePerson {
                    family_id: key.0,
                    person_id: key.1,
                });
            }
            let index = data.persons.len();
            let family_position = match data.family_index.get(&person.family_id) {
                Some(&position) => position,
                None => {
                    data.families.push(Family {
                        family_id: person.family_id.clone(),
                        members: Vec::new(),
                    });
                    data.family_index.insert(person.family_id.clone(), data.families.len() - 1);
                    data.families.len() - 1
                }
            };
            data.families[family_position].members.push(index);
            data.person_index.insert(key, index);
            data.persons.push(person);
        }
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn family_ids(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(|family| family.family_id.as_str())
    }

    pub fn family(&self, family_id: &str) -> Option<FamilyView<'_>> {
        self.family_index.get(family_id).map(|&index| self.family_at(index))
    }

    /// Arena position of a family, stable for the lifetime of the data
    pub fn family_position(&self, family_id: &str) -> Option<usize> {
        self.family_index.get(family_id).copied()
    }

    pub(crate) fn family_at(&self, position: usize) -> FamilyView<'_> {
        FamilyView { data: self, family: &self.families[position] }
    }

    pub fn person(&self, family_id: &str, person_id: &str) -> Option<&Person> {
        self.person_index
            .get(&(family_id.to_string(), person_id.to_string()))
            .map(|&index| &self.persons[index])
    }

    /// Families with a member called `person_id`
    pub fn families_of_person(&self, person_id: &str) -> Vec<&str> {
        let mut families: Vec<&str> = self
            .persons
            .iter()
            .filter(|person| person.person_id == person_id)
            .map(|person| person.family_id.as_str())
            .collect();
        families.dedup();
        families
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// mom, dad, proband and sibling
    pub(crate) fn quad(family_id: &str) -> Vec<Person> {
        vec![
            Person::new(family_id, "mom1", Role::Mom, Sex::Female, Status::Unaffected),
            Person::new(family_id, "dad1", Role::Dad, Sex::Male, Status::Unaffected),
            Person::new(family_id, "ch1", Role::Prb, Sex::Male, Status::Affected).with_parents("mom1", "dad1"),
            Person::new(family_id, "ch2", Role::Sib, Sex::Female, Status::Unaffected).with_parents("mom1", "dad1"),
        ]
    }

    #[test]
    fn test_members_in_order_and_trios() {
        let data = FamiliesData::from_persons(quad("f1")).unwrap();
        let family = data.family("f1").unwrap();

        assert_eq!(family.members_ids(), vec!["mom1", "dad1", "ch1", "ch2"]);
        assert_eq!(
            family.trios(),
            vec![Trio { child: 2, mom: 0, dad: 1 }, Trio { child: 3, mom: 0, dad: 1 }]
        );
    }

    #[test]
    fn test_arena_lookup() {
        let mut persons = quad("f1");
        persons.extend(quad("f2"));
        let data = FamiliesData::from_persons(persons).unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data.person("f2", "ch1").map(|p| p.role), Some(Role::Prb));
        assert_eq!(data.families_of_person("mom1"), vec!["f1", "f2"]);
        assert!(data.family("f3").is_none());
    }

    #[test]
    fn test_duplicate_person_rejected() {
        let mut persons = quad("f1");
        persons.push(Person::new("f1", "ch1", Role::Sib, Sex::Male, Status::Unaffected));
        assert!(matches!(
            FamiliesData::from_persons(persons),
            Err(PedigreeError::DuplicatePerson { .. })
        ));
    }
}
